//! Exclusive FIFO command channel for interactive device commands.
//!
//! One background consumer thread per channel pops commands in issue order
//! and executes them against the device handle. Each submission gets its own
//! bounded completion channel, so callers can block on, poll, or ignore the
//! result. A failing command is logged and the loop keeps going; only
//! [`stop`](CommandChannel::stop) (or drop) ends the consumer, and the
//! in-flight command always finishes first.
//!
//! This is the only sanctioned path for interactive jog/home/position-poll
//! traffic. Exclusive runs bypass the channel and take the device via
//! [`DeviceSession::try_exclusive`](crate::session::DeviceSession::try_exclusive).

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Poll interval for the consumer when the queue is empty.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

type Command<D> = Box<dyn FnOnce(&mut D) + Send>;

/// FIFO command queue with a single background consumer.
pub struct CommandChannel<D: Send + 'static> {
    sender: Option<Sender<Command<D>>>,
    running: Arc<AtomicBool>,
    consumer: Option<JoinHandle<()>>,
}

impl<D: Send + 'static> CommandChannel<D> {
    /// Spawn the consumer thread against a shared device handle.
    ///
    /// The handle is typically [`DeviceSession::stage_handle`]; the consumer
    /// locks it per command, so an active exclusive run stalls interactive
    /// commands instead of racing them.
    ///
    /// [`DeviceSession::stage_handle`]: crate::session::DeviceSession::stage_handle
    pub fn new(device: Arc<Mutex<D>>) -> Self {
        let (sender, receiver) = unbounded::<Command<D>>();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let consumer = std::thread::spawn(move || {
            consume_loop(&device, &receiver, &flag);
        });
        Self {
            sender: Some(sender),
            running,
            consumer: Some(consumer),
        }
    }

    /// Enqueue a command and get a receiver for its typed result.
    ///
    /// The receiver yields exactly one value, after the command has run. If
    /// the channel is stopped before the command is dequeued, the receiver
    /// disconnects without a value.
    pub fn submit<T, F>(&self, op: F) -> Receiver<anyhow::Result<T>>
    where
        F: FnOnce(&mut D) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = bounded(1);
        let command: Command<D> = Box::new(move |device| {
            let result = op(device);
            if let Err(err) = &result {
                warn!("command failed: {err:#}");
            }
            // Receiver may have been dropped; fire-and-forget is allowed.
            let _ = done_tx.send(result);
        });
        if let Some(sender) = &self.sender {
            if sender.send(command).is_err() {
                warn!("command channel consumer is gone; dropping command");
            }
        }
        done_rx
    }

    /// Enqueue a command whose result nobody waits for.
    pub fn enqueue<F>(&self, op: F)
    where
        F: FnOnce(&mut D) -> anyhow::Result<()> + Send + 'static,
    {
        let _ = self.submit(op);
    }

    /// Stop the consumer after it finishes the command it is executing.
    /// Commands still queued are dropped; their receivers disconnect.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.sender.take();
        if let Some(handle) = self.consumer.take() {
            if handle.join().is_err() {
                warn!("command channel consumer panicked");
            }
        }
    }
}

impl<D: Send + 'static> Drop for CommandChannel<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consume_loop<D>(device: &Mutex<D>, receiver: &Receiver<Command<D>>, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(command) => {
                let mut guard = device.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                command(&mut guard);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("command channel consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::Duration;

    #[test]
    fn commands_run_in_issue_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let channel = CommandChannel::new(log.clone());
        let mut receivers = Vec::new();
        for i in 0..10u32 {
            receivers.push(channel.submit(move |log: &mut Vec<u32>| {
                log.push(i);
                Ok(i)
            }));
        }
        for (i, rx) in receivers.into_iter().enumerate() {
            let value = rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
            assert_eq!(value, i as u32);
        }
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn failing_command_does_not_stop_the_loop() {
        let device = Arc::new(Mutex::new(0u32));
        let channel = CommandChannel::new(device);
        let bad = channel.submit(|_: &mut u32| -> anyhow::Result<u32> { Err(anyhow!("boom")) });
        let good = channel.submit(|count: &mut u32| {
            *count += 1;
            Ok(*count)
        });
        assert!(bad.recv_timeout(Duration::from_secs(1)).unwrap().is_err());
        assert_eq!(
            good.recv_timeout(Duration::from_secs(1)).unwrap().unwrap(),
            1
        );
    }

    #[test]
    fn stop_drops_pending_commands() {
        let device = Arc::new(Mutex::new(0u32));
        let mut channel = CommandChannel::new(device.clone());
        // Hold the device so queued commands cannot start.
        let guard = device.lock().unwrap();
        let pending = channel.submit(|count: &mut u32| {
            *count += 1;
            Ok(())
        });
        // Give the consumer time to park on the lock or the queue.
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        channel.stop();
        // Either the command ran before stop (value arrives) or it was
        // dropped (receiver disconnects); it must never run after join.
        let _ = pending.recv_timeout(Duration::from_millis(100));
        let settled = *device.lock().unwrap();
        assert!(settled <= 1);
    }
}
