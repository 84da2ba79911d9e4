//! Puffer für Connectivity Candidates
//!
//! Candidates, die vor der Remote Description eintreffen, können noch nicht
//! angewendet werden. Sie werden hier in Ankunftsreihenfolge gehalten und
//! genau einmal ausgeleert, sobald die Remote Description gesetzt ist.

use crate::signaling::IceCandidate;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    drained: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hängt einen Candidate an (FIFO)
    ///
    /// Nach dem Ausleeren wird nichts mehr angenommen: der Candidate wird
    /// verworfen und `false` geliefert.
    pub fn push(&mut self, candidate: IceCandidate) -> bool {
        if self.drained {
            tracing::warn!("Candidate pushed after drain, dropped: {}", candidate.candidate);
            return false;
        }
        self.pending.push_back(candidate);
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wurde der Puffer bereits ausgeleert?
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Leert den Puffer, falls die Remote Description gesetzt ist
    ///
    /// Liefert alle Candidates in Ankunftsreihenfolge. Ohne Remote
    /// Description oder bei einem zweiten Aufruf passiert nichts.
    pub fn drain_if_ready(&mut self, remote_description_set: bool) -> Vec<IceCandidate> {
        if !remote_description_set || self.drained {
            return Vec::new();
        }
        self.drained = true;
        self.pending.drain(..).collect()
    }

    /// Verwirft alle gepufferten Candidates (Teardown)
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
