//! Drives a group of agents through the bridge one tick at a time.
//!
//! Each tick the hub gives every agent the agents within
//! `neighbor_distance` as neighbors (in coordinates relative to itself),
//! its own absolute position and the messages sent to it during the previous
//! tick, then steps it and routes what it sent to its current neighbors.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Bridge, BridgeError, StepOutcome, VmHandle};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Position) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// `self` as seen from `origin`.
    pub fn relative_to(self, origin: Position) -> Position {
        Position::new(self.x - origin.x, self.y - origin.y, self.z - origin.z)
    }
}

/// Latest known position of every agent, keyed by context id. Clones share
/// the same board, so trackers on other threads can move agents between
/// ticks.
#[derive(Debug, Clone, Default)]
pub struct PositionBoard {
    positions: Arc<Mutex<HashMap<u16, Position>>>,
}

impl PositionBoard {
    pub fn update(&self, context_id: u16, position: Position) {
        self.positions.lock().insert(context_id, position);
    }

    pub fn get(&self, context_id: u16) -> Option<Position> {
        self.positions.lock().get(&context_id).copied()
    }

    pub fn snapshot(&self) -> HashMap<u16, Position> {
        self.positions.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub stepped: usize,
    pub faulted: usize,
    /// Deliveries queued for the next tick, one per receiving neighbor.
    pub routed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Agent {
    vm: VmHandle,
    context_id: u16,
}

#[derive(Debug)]
pub struct SwarmHub {
    neighbor_distance: f32,
    agents: Vec<Agent>,
    board: PositionBoard,
    /// Receiver context id → (sender, payload), delivered next tick.
    pending: HashMap<u16, Vec<(u16, Vec<u8>)>>,
}

impl SwarmHub {
    pub fn new(neighbor_distance: f32) -> Self {
        Self {
            neighbor_distance,
            agents: Vec::new(),
            board: PositionBoard::default(),
            pending: HashMap::new(),
        }
    }

    pub fn board(&self) -> PositionBoard {
        self.board.clone()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn add_agent(&mut self, vm: VmHandle, context_id: u16, position: Position) {
        self.board.update(context_id, position);
        self.agents.push(Agent { vm, context_id });
    }

    pub fn tick(&mut self, bridge: &mut Bridge) -> Result<TickReport, BridgeError> {
        let positions = self.board.snapshot();
        let mut inbox = std::mem::take(&mut self.pending);
        let mut report = TickReport::default();

        for agent in &self.agents {
            if bridge.done(agent.vm)? {
                // A stopped VM never drains its inbound queue.
                if let Some(mail) = inbox.remove(&agent.context_id) {
                    log::debug!(
                        "{}: discarding {} messages for a stopped agent",
                        agent.vm,
                        mail.len()
                    );
                }
                report.faulted += 1;
                continue;
            }
            let own = positions.get(&agent.context_id).copied().unwrap_or_default();

            bridge.reset_neighbors(agent.vm)?;
            let mut receivers = Vec::new();
            for other in &self.agents {
                if other.context_id == agent.context_id {
                    continue;
                }
                let theirs = positions.get(&other.context_id).copied().unwrap_or_default();
                if own.distance(theirs) > self.neighbor_distance {
                    continue;
                }
                let rel = theirs.relative_to(own);
                bridge.add_neighbor(agent.vm, other.context_id as i32, rel.x, rel.y, rel.z)?;
                receivers.push(other.context_id);
            }
            bridge.set_absolute_position(agent.vm, own.x, own.y, own.z)?;

            for (sender, payload) in inbox.remove(&agent.context_id).unwrap_or_default() {
                bridge.feed_message(agent.vm, sender as i32, &payload)?;
            }

            match bridge.step(agent.vm)? {
                StepOutcome::Ready => report.stepped += 1,
                StepOutcome::Faulted(_) => {
                    report.faulted += 1;
                    continue;
                }
            }

            while let Some(payload) = bridge.next_outbound(agent.vm)? {
                for &receiver in &receivers {
                    self.pending
                        .entry(receiver)
                        .or_default()
                        .push((agent.context_id, payload.clone()));
                    report.routed += 1;
                }
            }
        }

        let dropped: usize = inbox.values().map(Vec::len).sum();
        if dropped > 0 {
            log::warn!("dropped {dropped} messages addressed to unknown agents");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytecode::ProgramBuilder;

    use super::*;
    use crate::HostValue;
    use crate::testing::{ScriptFiles, bridge};

    /// Every step sends "hi". The listener counts messages in `received`
    /// and keeps the last sender in `from`.
    fn chatter(b: &mut ProgramBuilder) {
        b.code().push_int(0);
        b.store_global("received");
        let handler = b.code().push_closure();
        b.store_global("on_message");
        b.call_global("listen", |b| {
            b.load_global("on_message");
            1
        });
        b.code().pop();
        let step = b.define("step");
        b.code().done();

        b.code().bind(handler);
        b.load_global("received");
        b.code().push_int(1);
        b.code().binary(bytecode::BinaryOp::Add);
        b.store_global("received");
        b.code().local_load(1);
        b.store_global("from");
        b.code().ret0();

        b.code().bind(step);
        b.call_global("send", |b| {
            b.push_str("hi");
            1
        });
        b.code().ret1();
    }

    #[test]
    fn messages_reach_neighbors_next_tick() {
        let script = ScriptFiles::build(chatter);
        let mut bridge = bridge();
        let mut hub = SwarmHub::new(5.0);
        let a = script.load(&mut bridge, 1);
        let b = script.load(&mut bridge, 2);
        let far = script.load(&mut bridge, 3);
        hub.add_agent(a, 1, Position::new(0.0, 0.0, 0.0));
        hub.add_agent(b, 2, Position::new(3.0, 4.0, 0.0));
        hub.add_agent(far, 3, Position::new(100.0, 0.0, 0.0));

        let first = hub.tick(&mut bridge).unwrap();
        assert_eq!(
            first,
            TickReport {
                stepped: 3,
                faulted: 0,
                routed: 2
            }
        );
        assert_eq!(bridge.global(a, "received").unwrap(), HostValue::Int(0));

        hub.tick(&mut bridge).unwrap();
        assert_eq!(bridge.global(a, "received").unwrap(), HostValue::Int(1));
        assert_eq!(bridge.global(a, "from").unwrap(), HostValue::Int(2));
        assert_eq!(bridge.global(b, "from").unwrap(), HostValue::Int(1));
        assert_eq!(bridge.global(far, "received").unwrap(), HostValue::Int(0));
    }

    #[test]
    fn neighbors_are_relative() {
        let script = ScriptFiles::build(|b| b.code().done());
        let mut bridge = bridge();
        let mut hub = SwarmHub::new(10.0);
        let a = script.load(&mut bridge, 1);
        let b = script.load(&mut bridge, 2);
        hub.add_agent(a, 1, Position::new(1.0, 1.0, 0.0));
        hub.add_agent(b, 2, Position::new(4.0, 5.0, 0.0));
        hub.tick(&mut bridge).unwrap();

        let seen = bridge.neighbors(a).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!((seen[0].id, seen[0].x, seen[0].y), (2, 3.0, 4.0));
        let back = bridge.neighbors(b).unwrap();
        assert_eq!((back[0].id, back[0].x, back[0].y), (1, -3.0, -4.0));
    }

    #[test]
    fn board_updates_from_other_threads() {
        let script = ScriptFiles::build(|b| b.code().done());
        let mut bridge = bridge();
        let mut hub = SwarmHub::new(2.0);
        let a = script.load(&mut bridge, 1);
        let b = script.load(&mut bridge, 2);
        hub.add_agent(a, 1, Position::default());
        hub.add_agent(b, 2, Position::new(50.0, 0.0, 0.0));
        hub.tick(&mut bridge).unwrap();
        assert!(bridge.neighbors(a).unwrap().is_empty());

        let board = hub.board();
        thread::spawn(move || board.update(2, Position::new(1.0, 0.0, 0.0)))
            .join()
            .unwrap();
        hub.tick(&mut bridge).unwrap();
        assert_eq!(bridge.neighbors(a).unwrap().len(), 1);
    }

    #[test]
    fn faulted_agents_are_counted() {
        let broken = ScriptFiles::build(|b| {
            b.call_global("nothing", |_| 0);
            b.code().done();
        });
        let mut bridge = bridge();
        let mut hub = SwarmHub::new(1.0);
        let vm = broken.load(&mut bridge, 1);
        hub.add_agent(vm, 1, Position::default());
        let report = hub.tick(&mut bridge).unwrap();
        assert_eq!(
            report,
            TickReport {
                stepped: 0,
                faulted: 1,
                routed: 0
            }
        );
        assert_eq!(hub.agent_count(), 1);
        assert_eq!(hub.board().get(1), Some(Position::default()));
    }

    #[test]
    fn stopped_agents_do_not_accumulate_mail() {
        let broken = ScriptFiles::build(|b| {
            let step = b.define("step");
            b.code().done();
            b.code().bind(step);
            b.call_global("nothing", |_| 0);
            b.code().ret0();
        });
        let talker = ScriptFiles::build(chatter);
        let mut bridge = bridge();
        let mut hub = SwarmHub::new(10.0);
        let loud = talker.load(&mut bridge, 1);
        let dead = broken.load(&mut bridge, 2);
        hub.add_agent(loud, 1, Position::default());
        hub.add_agent(dead, 2, Position::new(1.0, 0.0, 0.0));

        for _ in 0..100 {
            let report = hub.tick(&mut bridge).unwrap();
            assert_eq!((report.stepped, report.faulted), (1, 1));
        }
        assert!(bridge.done(dead).unwrap());
        assert_eq!(bridge.instance(dead).unwrap().vm().inbound_len(), 0);
        assert!(hub.pending.values().map(Vec::len).sum::<usize>() <= 1);
    }
}
