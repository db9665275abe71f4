use crate::event::Event;
use anyhow::anyhow;
use futures::{FutureExt, future::BoxFuture};
use log::{debug, error, info, warn};
use std::future::Future;
use tokio::{
    sync::mpsc::{self, Sender},
    task::{JoinHandle, JoinSet},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub mod command;
pub mod compositor;
pub mod logind;
pub mod upower;

/// Large enough to absorb a burst of simultaneous signals without blocking
/// the observers.
pub const QUEUE_CAPACITY: usize = 16;

type ObserverFn =
    Box<dyn FnOnce(Sender<Event>, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// One independent source of [`Event`]s.
pub struct Observer {
    name: &'static str,
    run: ObserverFn,
}

impl Observer {
    pub fn new<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(Sender<Event>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name,
            run: Box::new(move |tx, token| run(tx, token).boxed()),
        }
    }
}

/// The merged event stream of every observer plus the handle reporting why
/// they stopped.
pub struct Listener {
    pub events: ReceiverStream<Event>,
    done: JoinHandle<anyhow::Result<()>>,
}

impl Listener {
    /// Waits for every observer to stop. Returns the first fatal observer
    /// error, or `Ok` on an ordinary shutdown.
    pub async fn finish(self) -> anyhow::Result<()> {
        self.done
            .await
            .map_err(|e| anyhow!("observer supervisor panicked: {e}"))?
    }
}

/// Sends `event` unless the daemon is shutting down. Returns `false` when
/// the observer should stop.
pub async fn forward(tx: &Sender<Event>, token: &CancellationToken, event: Event) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// Runs every observer concurrently, funnelling their events into one
/// bounded queue.
///
/// The first observer to fail cancels all the others; its error is the one
/// reported by [`Listener::finish`]. The event stream ends once every
/// observer has stopped, whether through failure or cancellation of `token`.
pub fn listen(observers: Vec<Observer>, token: CancellationToken) -> Listener {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let token = token.child_token();

    let mut set = JoinSet::new();
    for observer in observers {
        let tx = tx.clone();
        let token = token.clone();
        set.spawn(async move {
            debug!("starting {} observer", observer.name);
            let run = (observer.run)(tx, token.clone());
            // Observers see the token themselves; polling them first lets
            // them finish their own shutdown.
            let res = tokio::select! {
                biased;
                res = run => res,
                _ = token.cancelled() => Ok(()),
            };
            (observer.name, res)
        });
    }
    drop(tx);

    let done = tokio::spawn(async move {
        let mut first_err: Option<anyhow::Error> = None;

        while let Some(joined) = set.join_next().await {
            let err = match joined {
                Ok((name, Ok(()))) => {
                    debug!("{name} observer stopped");
                    continue;
                }
                Ok((name, Err(e))) => e.context(format!("{name} observer failed")),
                Err(e) => anyhow!("observer task aborted: {e}"),
            };

            if first_err.is_none() {
                error!("{err:#}; stopping all observers");
                token.cancel();
                first_err = Some(err);
            } else {
                warn!("discarding secondary observer error: {err:#}");
            }
        }

        info!("all observers stopped");
        first_err.map_or(Ok(()), Err)
    });

    Listener {
        events: ReceiverStream::new(rx),
        done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LidState, PowerState};
    use anyhow::bail;
    use futures::StreamExt;
    use std::time::Duration;

    async fn emit(
        events: Vec<Event>,
        tx: Sender<Event>,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        for event in events {
            if !forward(&tx, &token, event).await {
                return Ok(());
            }
        }
        token.cancelled().await;
        Ok(())
    }

    async fn idle(_tx: Sender<Event>, token: CancellationToken) -> anyhow::Result<()> {
        token.cancelled().await;
        Ok(())
    }

    async fn fail_now(_tx: Sender<Event>, _token: CancellationToken) -> anyhow::Result<()> {
        bail!("connection lost")
    }

    async fn fail_late(_tx: Sender<Event>, token: CancellationToken) -> anyhow::Result<()> {
        token.cancelled().await;
        bail!("late failure")
    }

    fn emitter(events: Vec<Event>) -> Observer {
        Observer::new("emitter", move |tx, token| emit(events, tx, token))
    }

    fn idler() -> Observer {
        Observer::new("idler", idle)
    }

    #[tokio::test]
    async fn merges_events_from_every_observer() {
        let token = CancellationToken::new();
        let mut listener = listen(
            vec![
                emitter(vec![Event::Lid(LidState::Open)]),
                emitter(vec![Event::Power(PowerState::Ac), Event::Suspend]),
            ],
            token.clone(),
        );

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(listener.events.next().await.unwrap().to_string());
        }
        seen.sort();
        assert_eq!(seen, vec!["lid open", "power ac", "suspend requested"]);

        token.cancel();
        assert!(listener.events.next().await.is_none());
        listener.finish().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_ends_stream_cleanly() {
        let token = CancellationToken::new();
        let mut listener = listen(vec![idler(), idler()], token.clone());

        token.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), listener.events.next()).await;
        assert!(matches!(end, Ok(None)));
        listener.finish().await.unwrap();
    }

    #[tokio::test]
    async fn first_failure_wins_and_stops_siblings() {
        let token = CancellationToken::new();
        let failing = Observer::new("bus", fail_now);
        let late = Observer::new("socket", fail_late);

        let mut listener = listen(vec![failing, idler(), late], token.clone());

        assert!(listener.events.next().await.is_none());
        let err = listener.finish().await.unwrap_err();
        assert_eq!(format!("{err:#}"), "bus observer failed: connection lost");
        // The caller's token is left alone; only the observers were stopped.
        assert!(!token.is_cancelled());
    }
}
