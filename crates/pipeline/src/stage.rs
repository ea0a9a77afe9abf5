//! Stage runtime.
//!
//! A pipeline is a chain of [`Stage`]s joined by unbounded queues. Each stage
//! runs as its own task: it drains whatever is waiting on its input, processes
//! that as one batch, forwards the results in order and starts over. Shutdown
//! travels through the chain as a [`Message::Shutdown`] sentinel, which every
//! stage forwards exactly once after everything it received before it.

use crate::error::{Error, ErrorKind, Result};
use async_channel::TryRecvError;
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use tokio::task::JoinSet;
use tracing::{instrument, trace, warn};

/// What flows between stages.
#[derive(Debug)]
pub enum Message<T> {
    Item(T),
    /// No more items follow.
    Shutdown,
}

pub type Sender<T> = async_channel::Sender<Message<T>>;
pub type Receiver<T> = async_channel::Receiver<Message<T>>;

/// An unbounded FIFO queue between two stages.
pub fn queue<T>() -> (Sender<T>, Receiver<T>) {
    async_channel::unbounded()
}

/// One step of a pipeline.
#[async_trait]
pub trait Stage: Send + 'static {
    type Item: Send + 'static;

    fn name(&self) -> &'static str;

    /// Process one batch. Every item must be returned exactly once; the order
    /// of the returned items is the order they are forwarded in.
    async fn process(&mut self, batch: Vec<Self::Item>) -> Result<Vec<Self::Item>>;
}

/// Run `stage` until its input is exhausted.
///
/// Each iteration takes everything already queued without waiting; only when
/// nothing at all has been received does it wait for the next message. A
/// sentinel found part-way through a drain ends the run after the batch it
/// belongs to has been processed and forwarded. An input that closes without
/// a sentinel is treated the same way.
#[instrument(skip_all, fields(stage = stage.name()))]
pub async fn run_stage<S: Stage>(mut stage: S, input: Receiver<S::Item>, output: Sender<S::Item>) -> Result<()> {
    loop {
        let mut batch = Vec::new();
        let mut shutdown = false;
        loop {
            let message = match input.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) if batch.is_empty() && !shutdown => match input.recv().await {
                    Ok(message) => message,
                    Err(_) => {
                        warn!("input closed without a shutdown message");
                        shutdown = true;
                        break;
                    },
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    if !shutdown {
                        warn!("input closed without a shutdown message");
                    }
                    shutdown = true;
                    break;
                },
            };
            match message {
                Message::Item(item) => batch.push(item),
                Message::Shutdown => shutdown = true,
            }
        }

        if !batch.is_empty() {
            let received = batch.len();
            let processed = stage.process(batch).await?;
            trace!(received, forwarded = processed.len(), "batch processed");
            for item in processed {
                if output.send(Message::Item(item)).await.is_err() {
                    exn::bail!(ErrorKind::Disconnected);
                }
            }
        }

        if shutdown {
            // A closed output here only means nobody is listening for the end.
            _ = output.send(Message::Shutdown).await;
            return Ok(());
        }
    }
}

type SpawnStage<T> = Box<dyn FnOnce(&mut JoinSet<Result<()>>, Receiver<T>) -> Receiver<T> + Send>;

/// A chain of stages that have not been started yet.
pub struct Pipeline<T> {
    stages: Vec<SpawnStage<T>>,
}

impl<T: Send + 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage, fed by the output of the previous one.
    pub fn then<S: Stage<Item = T>>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(move |tasks, input| {
            let (tx, rx) = queue();
            tasks.spawn(run_stage(stage, input, tx));
            rx
        }));
        self
    }

    /// Start one task per stage on the current runtime.
    pub fn spawn(self) -> RunningPipeline<T> {
        let (input, mut output) = queue();
        let mut tasks = JoinSet::new();
        for spawn in self.stages {
            output = spawn(&mut tasks, output);
        }
        RunningPipeline { input, output, tasks }
    }

    /// Feed `items` through the pipeline and collect everything that comes
    /// out of the last stage.
    pub async fn run(self, items: impl IntoIterator<Item = T>) -> Result<Vec<T>> {
        let running = self.spawn();
        for item in items {
            // A stage stopped early; finishing reports why.
            if running.send(item).await.is_err() {
                break;
            }
        }
        running.finish().await
    }
}

/// A pipeline whose stages are running.
pub struct RunningPipeline<T> {
    input: Sender<T>,
    output: Receiver<T>,
    tasks: JoinSet<Result<()>>,
}

impl<T: Send + 'static> RunningPipeline<T> {
    pub async fn send(&self, item: T) -> Result<()> {
        if self.input.send(Message::Item(item)).await.is_err() {
            exn::bail!(ErrorKind::Disconnected);
        }
        Ok(())
    }

    /// Signal the end of input and stream what the last stage forwards.
    ///
    /// Once the last item has been yielded, the stage tasks are joined; a
    /// failed stage surfaces as a final `Err` item.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send {
        let Self { input, output, mut tasks } = self;
        stream!({
            // Fails only if the first stage has already stopped; joining
            // below reports why.
            _ = input.send(Message::Shutdown).await;
            drop(input);
            while let Ok(message) = output.recv().await {
                match message {
                    Message::Item(item) => yield Ok(item),
                    Message::Shutdown => break,
                }
            }
            if let Err(err) = join_stages(&mut tasks).await {
                yield Err(err);
            }
        })
    }

    pub async fn finish(self) -> Result<Vec<T>> {
        self.into_stream().try_collect().await
    }
}

/// Wait for every stage and report the failure that stopped the pipeline.
///
/// One failing stage makes its neighbours fail with
/// [`ErrorKind::Disconnected`]; the original failure is preferred.
async fn join_stages(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    let mut failure: Option<Error> = None;
    while let Some(joined) = tasks.join_next().await {
        let Err(err) = joined.or_raise(|| ErrorKind::Panicked).and_then(|result| result) else {
            continue;
        };
        let replace = match &failure {
            None => true,
            Some(current) => {
                matches!(&**current, ErrorKind::Disconnected) && !matches!(&*err, ErrorKind::Disconnected)
            },
        };
        if replace {
            failure = Some(err);
        }
    }
    failure.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::{Arc, Mutex};

    /// Records every batch it sees and passes items through.
    struct Recorder {
        name: &'static str,
        batches: Arc<Mutex<Vec<Vec<u32>>>>,
    }

    impl Recorder {
        fn new(name: &'static str) -> (Self, Arc<Mutex<Vec<Vec<u32>>>>) {
            let batches = Arc::new(Mutex::new(Vec::new()));
            (Self { name, batches: batches.clone() }, batches)
        }
    }

    #[async_trait]
    impl Stage for Recorder {
        type Item = u32;

        fn name(&self) -> &'static str {
            self.name
        }

        async fn process(&mut self, batch: Vec<u32>) -> Result<Vec<u32>> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(batch)
        }
    }

    struct Failing;

    #[async_trait]
    impl Stage for Failing {
        type Item = u32;

        fn name(&self) -> &'static str {
            "failing"
        }

        async fn process(&mut self, _batch: Vec<u32>) -> Result<Vec<u32>> {
            exn::bail!(ErrorKind::Stage("failing"))
        }
    }

    #[tokio::test]
    async fn test_queued_items_are_processed_as_one_batch() {
        let (stage, batches) = Recorder::new("recorder");
        let (in_tx, in_rx) = queue();
        let (out_tx, out_rx) = queue();
        for i in 0..5 {
            in_tx.send(Message::Item(i)).await.unwrap();
        }
        in_tx.send(Message::Shutdown).await.unwrap();

        run_stage(stage, in_rx, out_tx).await.unwrap();

        assert_eq!(*batches.lock().unwrap(), vec![vec![0, 1, 2, 3, 4]]);
        let mut forwarded = Vec::new();
        while let Ok(message) = out_rx.try_recv() {
            forwarded.push(message);
        }
        assert_eq!(forwarded.len(), 6);
        assert!(matches!(forwarded.last(), Some(Message::Shutdown)));
        let items: Vec<u32> = forwarded
            .into_iter()
            .filter_map(|m| match m {
                Message::Item(i) => Some(i),
                Message::Shutdown => None,
            })
            .collect();
        assert_eq!(items, [0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_idle_stage_waits_for_input() {
        let (stage, batches) = Recorder::new("recorder");
        let (in_tx, in_rx) = queue();
        let (out_tx, out_rx) = queue();
        let task = tokio::spawn(run_stage(stage, in_rx, out_tx));

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        in_tx.send(Message::Item(7)).await.unwrap();
        assert!(matches!(out_rx.recv().await.unwrap(), Message::Item(7)));
        in_tx.send(Message::Shutdown).await.unwrap();
        assert!(matches!(out_rx.recv().await.unwrap(), Message::Shutdown));

        task.await.unwrap().unwrap();
        assert_eq!(*batches.lock().unwrap(), vec![vec![7]]);
    }

    #[tokio::test]
    async fn test_closed_input_still_forwards_shutdown() {
        let (stage, _) = Recorder::new("recorder");
        let (in_tx, in_rx) = queue();
        let (out_tx, out_rx) = queue();
        in_tx.send(Message::Item(1)).await.unwrap();
        drop(in_tx);

        run_stage(stage, in_rx, out_tx).await.unwrap();
        assert!(matches!(out_rx.try_recv().unwrap(), Message::Item(1)));
        assert!(matches!(out_rx.try_recv().unwrap(), Message::Shutdown));
        assert!(out_rx.try_recv().is_err());
    }

    #[rstest]
    #[case::single(1)]
    #[case::three(3)]
    #[case::ten(10)]
    #[tokio::test]
    async fn test_shutdown_is_forwarded_exactly_once(#[case] stages: usize) {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        let mut pipeline = Pipeline::new();
        let mut recorders = Vec::new();
        for name in names.into_iter().take(stages) {
            let (stage, batches) = Recorder::new(name);
            pipeline = pipeline.then(stage);
            recorders.push(batches);
        }
        let running = pipeline.spawn();
        for i in 0..100 {
            running.send(i).await.unwrap();
        }
        let RunningPipeline { input, output, mut tasks } = running;
        input.send(Message::Shutdown).await.unwrap();

        let mut items = Vec::new();
        let mut sentinels = 0;
        while let Ok(message) = output.recv().await {
            match message {
                Message::Item(i) => items.push(i),
                Message::Shutdown => sentinels += 1,
            }
        }
        join_stages(&mut tasks).await.unwrap();

        assert_eq!(sentinels, 1);
        assert_eq!(items, (0..100).collect::<Vec<_>>());
        for batches in recorders {
            let seen: usize = batches.lock().unwrap().iter().map(Vec::len).sum();
            assert_eq!(seen, 100);
        }
    }

    #[tokio::test]
    async fn test_run_with_no_stages_passes_items_through() {
        let out = Pipeline::new().run([1u32, 2, 3]).await.unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stage_failure_is_reported() {
        let (first, _) = Recorder::new("first");
        let (last, _) = Recorder::new("last");
        let err = Pipeline::new().then(first).then(Failing).then(last).run([1u32, 2]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Stage("failing")));
    }
}
