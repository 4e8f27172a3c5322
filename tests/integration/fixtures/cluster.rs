//! Cluster state helpers.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use stripe_sync::cluster::{ClusterState, ClusterStatePersistor, ConnectionIdFactory};
use stripe_sync::core::{ChannelId, ConnectionId, GroupId};

#[derive(Default)]
pub struct RecordingConnectionIds {
    pub start: u64,
    seeded: Mutex<Vec<(String, ChannelId, usize)>>,
}

impl RecordingConnectionIds {
    pub fn starting_at(start: u64) -> Arc<Self> {
        Arc::new(Self {
            start,
            seeded: Mutex::new(Vec::new()),
        })
    }

    pub fn seeded(&self) -> Vec<(String, ChannelId, usize)> {
        self.seeded.lock().expect("seeded lock poisoned").clone()
    }
}

impl ConnectionIdFactory for RecordingConnectionIds {
    fn current_connection_id(&self) -> ChannelId {
        ChannelId::new(self.start)
    }

    fn init(&self, stripe_name: &str, next_channel: ChannelId, connections: &BTreeSet<ConnectionId>) {
        self.seeded
            .lock()
            .expect("seeded lock poisoned")
            .push((stripe_name.to_string(), next_channel, connections.len()));
    }
}

pub fn open_cluster(persistor: Arc<dyn ClusterStatePersistor>, group: i32) -> Arc<ClusterState> {
    let cluster = ClusterState::open(
        GroupId::new(group),
        persistor,
        RecordingConnectionIds::starting_at(0),
    )
    .expect("open cluster state");
    Arc::new(cluster)
}
