use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::connection::ConnectionHandle;
use super::lock;
use super::protocol::Packet;

/// Application-level handling of one packet. `C` is the opaque context the
/// embedding engine threads through; the network layer never looks at it.
pub trait PacketDispatch<C: ?Sized>: Send + Sync {
    fn dispatch(&self, ctx: &C, conn: &Arc<ConnectionHandle>, packet: Packet);
}

impl<C: ?Sized, F> PacketDispatch<C> for F
where
    F: Fn(&C, &Arc<ConnectionHandle>, Packet) + Send + Sync,
{
    fn dispatch(&self, ctx: &C, conn: &Arc<ConnectionHandle>, packet: Packet) {
        self(ctx, conn, packet)
    }
}

/// Hook the network thread calls into; everything here must return
/// quickly since it runs on the I/O loop.
pub trait ProcessingScheduler: Send + Sync {
    /// `conn` has newly queued inbound packets; arrange for
    /// [`ConnectionHandle::process_packets`] to run off the network thread.
    fn enqueue_processing(&self, conn: Arc<ConnectionHandle>);

    fn connection_opened(&self, _conn: &Arc<ConnectionHandle>) {}

    fn connection_closed(&self, _conn: &Arc<ConnectionHandle>) {}
}

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Arc<ConnectionHandle>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new<C>(size: usize, ctx: Arc<C>, dispatch: Arc<dyn PacketDispatch<C>>) -> Self
    where
        C: Send + Sync + ?Sized + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let ctx = Arc::clone(&ctx);
                let dispatch = Arc::clone(&dispatch);
                thread::Builder::new()
                    .name(format!("packet-worker-{}", index))
                    .spawn(move || worker_loop(&receiver, &*ctx, &*dispatch))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("Failed to spawn packet worker: {}", e);
                    None
                }
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Stops accepting work, lets queued jobs finish and waits up to
    /// `timeout` for the workers. Workers still busy after that are
    /// detached. Returns whether every worker exited cleanly.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        lock(&self.sender).take();

        let workers = std::mem::take(&mut *lock(&self.workers));
        let deadline = Instant::now() + timeout;
        while !workers.iter().all(JoinHandle::is_finished) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let mut clean = true;
        for worker in workers {
            if !worker.is_finished() {
                log::warn!(
                    "Packet worker {:?} still busy after {:?}, detaching",
                    worker.thread().name(),
                    timeout
                );
                clean = false;
            } else if worker.join().is_err() {
                log::warn!("Packet worker panicked");
                clean = false;
            }
        }
        clean
    }
}

fn worker_loop<C: ?Sized>(
    receiver: &Mutex<Receiver<Arc<ConnectionHandle>>>,
    ctx: &C,
    dispatch: &dyn PacketDispatch<C>,
) {
    loop {
        let job = lock(receiver).recv();
        match job {
            Ok(conn) => loop {
                conn.process_packets(ctx, dispatch);
                conn.finish_scheduled();
                if conn.pending_inbound() == 0 || !conn.try_schedule() {
                    break;
                }
            },
            Err(_) => break,
        }
    }
}

impl ProcessingScheduler for WorkerPool {
    /// At most one job per connection is queued or running at a time, so a
    /// slow connection occupies a single worker.
    fn enqueue_processing(&self, conn: Arc<ConnectionHandle>) {
        if !conn.try_schedule() {
            return;
        }
        match lock(&self.sender).as_ref() {
            Some(sender) => {
                if let Err(e) = sender.send(conn) {
                    e.0.finish_scheduled();
                    log::warn!("Packet workers are gone, dropping processing request");
                }
            }
            None => {
                conn.finish_scheduled();
                log::debug!("{}: pool shut down, not processing", conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::net::config::NetConfig;
    use crate::net::connection::ConnectionId;
    use crate::net::protocol::CorrelationId;

    type Log = Mutex<Vec<(usize, u32)>>;

    fn handle(id: usize) -> Arc<ConnectionHandle> {
        let addr: SocketAddr = format!("127.0.0.1:{}", 41000 + id).parse().unwrap();
        Arc::new(ConnectionHandle::new(
            ConnectionId(id),
            addr,
            CorrelationId(id as u64),
            &NetConfig::default(),
        ))
    }

    fn recording_pool(workers: usize) -> (WorkerPool, Arc<Log>) {
        let log: Arc<Log> = Arc::new(Mutex::new(Vec::new()));
        let dispatch: Arc<dyn PacketDispatch<Log>> =
            Arc::new(|log: &Log, conn: &Arc<ConnectionHandle>, packet: Packet| {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&packet.payload);
                lock(log).push((conn.id().0, u32::from_be_bytes(bytes)));
            });
        (WorkerPool::new(workers, Arc::clone(&log), dispatch), log)
    }

    fn wait_for(log: &Log, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while lock(log).len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_per_connection_order_with_many_workers() {
        let (pool, log) = recording_pool(4);
        assert_eq!(pool.worker_count(), 4);
        let connections: Vec<_> = (1..=3).map(handle).collect();

        for i in 0..300u32 {
            for conn in &connections {
                conn.feed_immediate(i.to_be_bytes().to_vec());
                pool.enqueue_processing(Arc::clone(conn));
            }
        }

        wait_for(&log, 900);
        let log = lock(&log);
        assert_eq!(log.len(), 900);
        for conn in &connections {
            let seen: Vec<u32> = log
                .iter()
                .filter(|(id, _)| *id == conn.id().0)
                .map(|(_, value)| *value)
                .collect();
            assert_eq!(seen, (0..300).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_busy_connection_leaves_workers_free() {
        type Timeline = Mutex<Vec<(usize, Instant)>>;
        let timeline: Arc<Timeline> = Arc::new(Mutex::new(Vec::new()));
        let dispatch: Arc<dyn PacketDispatch<Timeline>> =
            Arc::new(|timeline: &Timeline, conn: &Arc<ConnectionHandle>, _: Packet| {
                if conn.id().0 == 1 {
                    thread::sleep(Duration::from_millis(200));
                }
                lock(timeline).push((conn.id().0, Instant::now()));
            });
        let pool = WorkerPool::new(4, Arc::clone(&timeline), dispatch);

        let slow = handle(1);
        for i in 0..4u32 {
            slow.feed_immediate(i.to_be_bytes().to_vec());
            pool.enqueue_processing(Arc::clone(&slow));
        }

        let fast = handle(2);
        let start = Instant::now();
        fast.feed_immediate(0u32.to_be_bytes().to_vec());
        pool.enqueue_processing(Arc::clone(&fast));

        let deadline = start + Duration::from_secs(5);
        let finished = loop {
            let done = lock(&timeline).iter().find(|(id, _)| *id == 2).map(|(_, at)| *at);
            if let Some(at) = done {
                break at;
            }
            assert!(Instant::now() < deadline, "second connection never processed");
            thread::sleep(Duration::from_millis(1));
        };
        assert!(finished - start < Duration::from_millis(150));

        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(lock(&timeline).len(), 5);
    }

    #[test]
    fn test_one_job_per_connection() {
        let (pool, log) = recording_pool(2);
        let conn = handle(1);
        assert!(conn.try_schedule());
        conn.feed_immediate(7u32.to_be_bytes().to_vec());
        pool.enqueue_processing(Arc::clone(&conn));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(lock(&log).len(), 0);

        conn.finish_scheduled();
        pool.enqueue_processing(Arc::clone(&conn));
        wait_for(&log, 1);
        assert_eq!(*lock(&log), vec![(1, 7)]);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_drains_queued_work() {
        let (pool, log) = recording_pool(1);
        let conn = handle(1);
        for i in 0..50u32 {
            conn.feed_immediate(i.to_be_bytes().to_vec());
        }
        pool.enqueue_processing(Arc::clone(&conn));

        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(lock(&log).len(), 50);
        assert_eq!(pool.worker_count(), 0);

        conn.feed_immediate(99u32.to_be_bytes().to_vec());
        pool.enqueue_processing(Arc::clone(&conn));
        assert_eq!(conn.pending_inbound(), 1);
    }
}
