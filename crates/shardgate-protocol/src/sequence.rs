/// Statement-scoped packet sequence counter.
///
/// The client's command packet carries sequence id 0, so the first frame of
/// every response is numbered 1. Ids wrap at 255 as the protocol requires.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    next: u8,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u8) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> u8 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    pub fn peek(&self) -> u8 {
        self.next
    }
}

impl Default for FrameSequence {
    fn default() -> Self {
        Self::new()
    }
}
