use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: u16,
    pub payload: Vec<u8>,
}

/// Inbound and outbound payload queues of one VM. Both are FIFO.
#[derive(Debug, Default)]
pub struct MessageQueues {
    inbound: VecDeque<InboundMessage>,
    outbound: VecDeque<Vec<u8>>,
}

impl MessageQueues {
    pub fn push_inbound(&mut self, message: InboundMessage) {
        self.inbound.push_back(message);
    }

    pub fn pop_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound.pop_front()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn push_outbound(&mut self, payload: Vec<u8>) {
        self.outbound.push_back(payload);
    }

    pub fn pop_outbound(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}
