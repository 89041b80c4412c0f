//! File d'attente FIFO des segments reçus mais pas encore ajoutés au sink.
//!
//! L'ordre d'insertion est l'ordre d'arrivée réseau, qui est aussi l'ordre
//! d'ajout exigé par le sink : aucune réorganisation, aucune déduplication.

use std::collections::VecDeque;

use bytes::Bytes;

/// Un chunk média tel que livré par le canal.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Numéro de séquence renvoyé dans l'`ack`
    pub seq: u64,
    /// Octets encodés, opaques pour le contrôleur
    pub payload: Bytes,
}

impl Segment {
    pub fn new(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SegmentQueue {
    items: VecDeque<Segment>,
}

impl SegmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: Segment) {
        self.items.push_back(segment);
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.items.pop_front()
    }

    /// Remet en tête un segment refusé par le sink.
    pub fn requeue(&mut self, segment: Segment) {
        self.items.push_front(segment);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
