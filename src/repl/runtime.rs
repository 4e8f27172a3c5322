//! Dedicated admission thread for one replication stream.
//!
//! The transport pushes inbound items into a crossbeam channel; a single
//! consumer thread owns the engine, so admission is serialized without a
//! lock. The first error ends the loop and is handed to whoever joins.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::core::Inbound;
use crate::Error;

use super::engine::{Admission, ReplicationSyncEngine};
use super::error::ReplError;

/// Anything that can own the admission point of a stream.
pub trait StreamConsumer: Send {
    fn consume(&mut self, item: Inbound) -> Result<Admission, Error>;

    /// The stream is over (explicitly or because every sender went away).
    fn close(&mut self) -> Result<(), Error>;
}

impl StreamConsumer for ReplicationSyncEngine {
    fn consume(&mut self, item: Inbound) -> Result<Admission, Error> {
        Ok(self.handle(item)?)
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(ReplicationSyncEngine::close(self)?)
    }
}

enum EngineCommand {
    Item(Inbound),
    Close,
}

/// Cloneable feed into a running engine.
#[derive(Clone)]
pub struct EngineSender {
    tx: Sender<EngineCommand>,
}

impl EngineSender {
    pub fn submit(&self, item: Inbound) -> Result<(), ReplError> {
        self.tx
            .send(EngineCommand::Item(item))
            .map_err(|_| ReplError::SessionClosed)
    }
}

pub struct EngineRuntime;

impl EngineRuntime {
    pub fn spawn<C>(name: &str, consumer: C) -> std::io::Result<EngineHandle>
    where
        C: StreamConsumer + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let join = thread::Builder::new()
            .name(format!("stripe-repl-{name}"))
            .spawn(move || run_consumer_loop(consumer, rx))?;
        Ok(EngineHandle {
            sender: EngineSender { tx },
            join,
        })
    }
}

pub struct EngineHandle {
    sender: EngineSender,
    join: JoinHandle<Result<(), Error>>,
}

impl EngineHandle {
    pub fn sender(&self) -> EngineSender {
        self.sender.clone()
    }

    pub fn submit(&self, item: Inbound) -> Result<(), ReplError> {
        self.sender.submit(item)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the consumer to stop after everything already queued.
    pub fn close(self) -> Result<(), Error> {
        let _ = self.sender.tx.send(EngineCommand::Close);
        self.join()
    }

    /// Wait for the loop to end: on the first error, on `close`, or when
    /// every [`EngineSender`] has been dropped.
    pub fn join(self) -> Result<(), Error> {
        let EngineHandle { sender, join } = self;
        drop(sender);
        match join.join() {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("replication consumer thread panicked");
                Err(ReplError::SessionFailed.into())
            }
        }
    }
}

fn run_consumer_loop<C: StreamConsumer>(
    mut consumer: C,
    rx: Receiver<EngineCommand>,
) -> Result<(), Error> {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            EngineCommand::Item(item) => {
                if let Err(err) = consumer.consume(item) {
                    let _ = consumer.close();
                    return Err(err);
                }
            }
            EngineCommand::Close => return consumer.close(),
        }
    }
    consumer.close()
}
