//! 流表：按 `StreamId` 持有所有活跃流。

use std::collections::HashMap;

use super::id::{LinkId, StreamId};
use super::link::FlowState;
use super::stream::{Stream, StreamKind};
use crate::sim::SimError;

#[derive(Debug, Default)]
pub struct StreamTable {
    streams: HashMap<StreamId, Stream>,
    next_id: u64,
}

impl StreamTable {
    pub fn next_id(&mut self) -> StreamId {
        let id = StreamId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, stream: Stream) {
        self.streams.insert(stream.id, stream);
    }

    pub fn remove(&mut self, id: StreamId) -> Option<Stream> {
        self.streams.remove(&id)
    }

    pub fn get(&self, id: StreamId) -> Result<&Stream, SimError> {
        self.streams.get(&id).ok_or(SimError::UnknownStream(id))
    }

    pub fn get_mut(&mut self, id: StreamId) -> Result<&mut Stream, SimError> {
        self.streams.get_mut(&id).ok_or(SimError::UnknownStream(id))
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn count_kind(&self, kind: StreamKind) -> usize {
        self.streams.values().filter(|s| s.kind == kind).count()
    }
}

impl FlowState for StreamTable {
    fn transmit_rate(&self, id: StreamId) -> f64 {
        self.streams.get(&id).map_or(0.0, |s| s.transmit_rate)
    }

    fn bottleneck(&self, id: StreamId) -> Option<LinkId> {
        self.streams.get(&id).and_then(|s| s.bottleneck)
    }
}
