//! Per-tick data plane: what the host writes into a VM before stepping it
//! and what it reads back afterwards.
use vm::{InboundMessage, Neighbor};

use crate::marshal::to_host;
use crate::{Bridge, BridgeError, HostValue, VmHandle};

/// Global holding the agent's own position.
pub const POSITION_GLOBAL: &str = "absolute_position";

impl Bridge {
    /// Empty the VM's `neighbors` table.
    pub fn reset_neighbors(&mut self, vm: VmHandle) -> Result<(), BridgeError> {
        self.instance_mut(vm)?.vm.reset_neighbors();
        Ok(())
    }

    /// Add `id` at `(x, y, z)` to the `neighbors` table. Ids wrap to 16 bits
    /// and a repeated id replaces the earlier entry.
    pub fn add_neighbor(
        &mut self,
        vm: VmHandle,
        id: i32,
        x: f32,
        y: f32,
        z: f32,
    ) -> Result<(), BridgeError> {
        let neighbor = Neighbor {
            id: id as u16,
            x,
            y,
            z,
        };
        self.instance_mut(vm)?.vm.add_neighbor(neighbor);
        Ok(())
    }

    /// Queue a copy of `payload` for the VM's listener. The sender id wraps
    /// to 16 bits.
    pub fn feed_message(
        &mut self,
        vm: VmHandle,
        sender_id: i32,
        payload: &[u8],
    ) -> Result<(), BridgeError> {
        self.instance_mut(vm)?.vm.push_inbound(InboundMessage {
            sender: sender_id as u16,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    pub fn set_absolute_position(
        &mut self,
        vm: VmHandle,
        x: f32,
        y: f32,
        z: f32,
    ) -> Result<(), BridgeError> {
        let machine = &mut self.instance_mut(vm)?.vm;
        let point = machine.new_point(x, y, z);
        machine.set_global(POSITION_GLOBAL, point);
        Ok(())
    }

    pub fn has_more_outbound(&self, vm: VmHandle) -> Result<bool, BridgeError> {
        Ok(self.require(vm)?.vm.has_outbound())
    }

    /// Take the oldest outbound payload, or `None` once the queue is empty.
    pub fn next_outbound(&mut self, vm: VmHandle) -> Result<Option<Vec<u8>>, BridgeError> {
        Ok(self.instance_mut(vm)?.vm.pop_outbound())
    }

    /// Neighbors injected since the last reset.
    pub fn neighbors(&self, vm: VmHandle) -> Result<&[Neighbor], BridgeError> {
        Ok(self.require(vm)?.vm.neighbors())
    }

    /// Copy of the global `name`; undefined globals read as `None`.
    pub fn global(&self, vm: VmHandle, name: &str) -> Result<HostValue, BridgeError> {
        let machine = &self.require(vm)?.vm;
        Ok(to_host(machine, &machine.global(name)))
    }
}

#[cfg(test)]
mod tests {
    use bytecode::ProgramBuilder;

    use super::*;
    use crate::StepOutcome;
    use crate::testing::{ScriptFiles, bridge};

    /// `handler(sender, payload)` records the last message in globals and
    /// echoes the payload back.
    fn listen_and_echo(b: &mut ProgramBuilder) {
        let handler = b.code().push_closure();
        b.store_global("on_message");
        b.call_global("listen", |b| {
            b.load_global("on_message");
            1
        });
        b.code().pop();
        b.code().done();

        b.code().bind(handler);
        b.code().local_load(1);
        b.store_global("last_sender");
        b.code().local_load(2);
        b.store_global("last_payload");
        b.call_global("send", |b| {
            b.code().local_load(2);
            1
        });
        b.code().ret1();
    }

    fn drain(bridge: &mut Bridge, vm: VmHandle) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while bridge.has_more_outbound(vm).unwrap() {
            out.push(bridge.next_outbound(vm).unwrap().unwrap());
        }
        out
    }

    #[test]
    fn inbound_message_reaches_listener_once() {
        let script = ScriptFiles::build(listen_and_echo);
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);
        bridge.feed_message(vm, 42, b"\x00hello").unwrap();
        assert_eq!(bridge.step(vm).unwrap(), StepOutcome::Ready);

        assert_eq!(
            bridge.global(vm, "last_sender").unwrap(),
            HostValue::Int(42)
        );
        assert_eq!(
            bridge.global(vm, "last_payload").unwrap(),
            HostValue::Bytes(b"\x00hello".to_vec())
        );
        assert_eq!(drain(&mut bridge, vm), vec![b"\x00hello".to_vec()]);

        assert_eq!(bridge.step(vm).unwrap(), StepOutcome::Ready);
        assert!(!bridge.has_more_outbound(vm).unwrap());
    }

    #[test]
    fn delivered_payloads_are_released_after_the_tick() {
        let script = ScriptFiles::build(listen_and_echo);
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);
        bridge.step(vm).unwrap();
        let baseline = bridge.instance(vm).unwrap().vm().string_count();

        for tick in 0..100u32 {
            for i in 0..100u32 {
                let payload = (tick * 100 + i).to_be_bytes();
                bridge.feed_message(vm, 1, &payload).unwrap();
            }
            assert_eq!(bridge.step(vm).unwrap(), StepOutcome::Ready);
            assert_eq!(drain(&mut bridge, vm).len(), 100);
            let count = bridge.instance(vm).unwrap().vm().string_count();
            assert!(count <= baseline + 1, "tick {tick}: {count} strings");
        }
        assert_eq!(
            bridge.global(vm, "last_payload").unwrap(),
            HostValue::Bytes(9999u32.to_be_bytes().to_vec())
        );
    }

    #[test]
    fn sender_ids_wrap_to_sixteen_bits() {
        let script = ScriptFiles::build(listen_and_echo);
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);
        bridge.feed_message(vm, 65536 + 7, b"x").unwrap();
        bridge.step(vm).unwrap();
        assert_eq!(bridge.global(vm, "last_sender").unwrap(), HostValue::Int(7));
    }

    #[test]
    fn echo_preserves_fifo_order() {
        let script = ScriptFiles::build(listen_and_echo);
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 9);
        let payloads: [&[u8]; 3] = [b"alpha", b"bravo", b"charlie"];
        for (sender, payload) in (1..=3).zip(payloads) {
            bridge.feed_message(vm, sender, payload).unwrap();
        }
        assert_eq!(bridge.step(vm).unwrap(), StepOutcome::Ready);
        assert_eq!(bridge.global(vm, "last_sender").unwrap(), HostValue::Int(3));

        let sent = drain(&mut bridge, vm);
        assert_eq!(sent, payloads.map(<[u8]>::to_vec));
        assert_eq!(bridge.next_outbound(vm).unwrap(), None);
    }

    #[test]
    fn outbound_payload_round_trips() {
        let script = ScriptFiles::build(|b| {
            let step = b.define("step");
            b.code().done();
            b.code().bind(step);
            b.call_global("send", |b| {
                b.push_str([0xde_u8, 0xad, 0xbe, 0xef]);
                1
            });
            b.code().ret1();
        });
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);
        assert!(!bridge.has_more_outbound(vm).unwrap());
        bridge.step(vm).unwrap();
        assert!(bridge.has_more_outbound(vm).unwrap());
        assert_eq!(
            bridge.next_outbound(vm).unwrap(),
            Some(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert!(!bridge.has_more_outbound(vm).unwrap());
    }

    #[test]
    fn neighbor_table_is_replaced_each_tick() {
        // step: count = size(neighbors); y2 = neighbors[2].y
        let script = ScriptFiles::build(|b| {
            let step = b.define("step");
            b.code().done();
            b.code().bind(step);
            b.call_global("size", |b| {
                b.load_global("neighbors");
                1
            });
            b.store_global("count");
            b.load_global("neighbors");
            b.code().push_int(2);
            b.code().table_get();
            b.push_str("y");
            b.code().table_get();
            b.store_global("y2");
            b.code().ret0();
        });
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);

        bridge.reset_neighbors(vm).unwrap();
        bridge.add_neighbor(vm, 1, 1.0, 0.0, 0.0).unwrap();
        bridge.add_neighbor(vm, 2, 0.0, 2.0, 0.0).unwrap();
        bridge.add_neighbor(vm, 2, 0.0, 3.0, 0.0).unwrap();
        assert_eq!(bridge.step(vm).unwrap(), StepOutcome::Ready);
        assert_eq!(bridge.global(vm, "count").unwrap(), HostValue::Int(2));
        assert_eq!(bridge.global(vm, "y2").unwrap(), HostValue::Float(3.0));

        bridge.reset_neighbors(vm).unwrap();
        bridge.add_neighbor(vm, 65536 + 2, 0.0, -1.0, 0.0).unwrap();
        assert_eq!(bridge.step(vm).unwrap(), StepOutcome::Ready);
        assert_eq!(bridge.global(vm, "count").unwrap(), HostValue::Int(1));
        assert_eq!(bridge.global(vm, "y2").unwrap(), HostValue::Float(-1.0));
        assert_eq!(
            bridge.neighbors(vm).unwrap(),
            &[Neighbor {
                id: 2,
                x: 0.0,
                y: -1.0,
                z: 0.0
            }]
        );
    }

    #[test]
    fn position_overwrites_previous_value() {
        let script = ScriptFiles::build(|b| {
            let step = b.define("step");
            b.code().done();
            b.code().bind(step);
            b.load_global(POSITION_GLOBAL);
            b.push_str("z");
            b.code().table_get();
            b.store_global("z");
            b.code().ret0();
        });
        let mut bridge = bridge();
        let vm = script.load(&mut bridge, 1);
        bridge.set_absolute_position(vm, 1.0, 2.0, 3.0).unwrap();
        bridge.set_absolute_position(vm, 4.0, 5.0, 6.5).unwrap();
        bridge.step(vm).unwrap();
        assert_eq!(bridge.global(vm, "z").unwrap(), HostValue::Float(6.5));
    }

    #[test]
    fn unknown_vm_is_rejected() {
        let mut bridge = bridge();
        let ghost = VmHandle::new(3);
        assert_eq!(
            bridge.feed_message(ghost, 1, b"x"),
            Err(BridgeError::UnknownVm(ghost))
        );
        assert_eq!(
            bridge.next_outbound(ghost),
            Err(BridgeError::UnknownVm(ghost))
        );
    }
}
