//! A dead-letter sink that keeps what it receives.

use std::sync::Mutex;

use stream_batch_processor::{DeadLetter, DeadLetterSink, SequenceNumber};

/// Records every dead letter for later inspection.
#[derive(Debug, Default)]
pub struct RecordingDeadLetter {
    letters: Mutex<Vec<DeadLetter>>,
}

impl RecordingDeadLetter {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded letters in arrival order.
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }

    /// Returns the sequence numbers of all recorded letters.
    pub fn sequence_numbers(&self) -> Vec<SequenceNumber> {
        self.letters
            .lock()
            .unwrap()
            .iter()
            .map(|letter| letter.record.sequence_number.clone())
            .collect()
    }

    /// Returns the number of recorded letters.
    pub fn len(&self) -> usize {
        self.letters.lock().unwrap().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for RecordingDeadLetter {
    fn record_permanent_failure(&self, letter: DeadLetter) {
        self.letters.lock().unwrap().push(letter);
    }
}
