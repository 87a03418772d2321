use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability;

use super::wal::Wal;

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// committed together with a single fsync.
pub(super) async fn run(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut pending: Vec<(Event, Ack)> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut deferred = None;
        match cmd {
            WalCommand::Append { event, response } => {
                pending.push((event, response));
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => pending.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit(&mut wal, &mut pending);
            }
            other => deferred = Some(other),
        }
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit(wal: &mut Wal, batch: &mut Vec<(Event, Ack)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut refused: Vec<Option<io::Error>> = Vec::with_capacity(batch.len());
    let mut appended = Ok(());
    for (event, _) in batch.iter() {
        match wal.append_buffered(event) {
            Ok(()) => refused.push(None),
            // Encoding and size checks fail before any byte is written, so
            // only this event is lost.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => refused.push(Some(e)),
            Err(e) => {
                appended = Err(e);
                break;
            }
        }
    }
    // Flush even after a failed append so half-written bytes do not ride
    // along with the next batch.
    let flushed = wal.flush_sync();
    let outcome = appended.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &outcome {
        tracing::error!(batch = batch.len(), "WAL commit failed: {e}");
    }
    for (i, (_, ack)) in batch.drain(..).enumerate() {
        let reply = match (&outcome, refused.get_mut(i).and_then(Option::take)) {
            (Err(e), _) => Err(io::Error::new(e.kind(), e.to_string())),
            (Ok(()), Some(e)) => {
                tracing::warn!("WAL refused event: {e}");
                Err(e)
            }
            (Ok(()), None) => Ok(()),
        };
        let _ = ack.send(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MAX_WAL_FRAME_BYTES;
    use crate::model::UserSummary;
    use ulid::Ulid;

    fn user_event(name: String) -> Event {
        Event::UserRegistered {
            user: UserSummary {
                id: Ulid::new(),
                full_name: name,
                email: "u@example.com".into(),
            },
        }
    }

    #[test]
    fn refused_event_fails_alone() {
        let dir = std::env::temp_dir().join("helpert_test_writer");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("refused.wal");
        let _ = std::fs::remove_file(&path);
        let mut wal = Wal::open(&path).unwrap();

        let before = user_event("ada".into());
        let after = user_event("grace".into());
        let (ack_before, mut rx_before) = oneshot::channel();
        let (ack_huge, mut rx_huge) = oneshot::channel();
        let (ack_after, mut rx_after) = oneshot::channel();
        let mut batch = vec![
            (before.clone(), ack_before),
            (user_event("x".repeat(MAX_WAL_FRAME_BYTES + 1)), ack_huge),
            (after.clone(), ack_after),
        ];
        commit(&mut wal, &mut batch);

        assert!(rx_before.try_recv().unwrap().is_ok());
        assert_eq!(rx_huge.try_recv().unwrap().unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert!(rx_after.try_recv().unwrap().is_ok());
        assert_eq!(Wal::replay(&path).unwrap(), vec![before, after]);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut single = vec![(event, response)];
            commit(wal, &mut single);
        }
    }
}
