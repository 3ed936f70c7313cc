use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracefarm_core::{Pixel, SceneId, SceneSpec, WorkerId};
use tracefarm_protocol::{ClientEvent, ServerEvent, UnitDescriptor, WorkerCodec};
use tracefarm_scheduler::config::SchedulingConfig;
use tracefarm_scheduler::metrics::SchedulerMetrics;
use tracefarm_scheduler::{tcp, Dispatcher, Finalizer, RenderedScene, SceneLedger};
use uuid::Uuid;

type Worker = Framed<TcpStream, WorkerCodec>;

#[derive(Default)]
struct RecordingLedger {
    joined: Mutex<usize>,
    left: Mutex<usize>,
}

impl SceneLedger for RecordingLedger {
    fn unfinished_scenes(&self) -> anyhow::Result<Vec<SceneSpec>> {
        Ok(Vec::new())
    }

    fn worker_joined(&self, _scene_id: &SceneId) -> anyhow::Result<()> {
        *self.joined.lock() += 1;
        Ok(())
    }

    fn worker_left(&self, _scene_id: &SceneId) -> anyhow::Result<()> {
        *self.left.lock() += 1;
        Ok(())
    }

    fn scene_finished(&self, _scene_id: &SceneId, _artifact: Option<String>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingFinalizer {
    scenes: Mutex<Vec<RenderedScene>>,
}

#[async_trait]
impl Finalizer for RecordingFinalizer {
    async fn finalize(&self, scene: RenderedScene) -> anyhow::Result<String> {
        let artifact = format!("{}.png", scene.spec.id);
        self.scenes.lock().push(scene);
        Ok(artifact)
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    addr: SocketAddr,
    ledger: Arc<RecordingLedger>,
    finalizer: Arc<RecordingFinalizer>,
}

impl Harness {
    async fn start(config: SchedulingConfig) -> Self {
        let ledger = Arc::new(RecordingLedger::default());
        let finalizer = Arc::new(RecordingFinalizer::default());
        let dispatcher = Arc::new(Dispatcher::new(
            config,
            ledger.clone(),
            finalizer.clone(),
            Arc::new(SchedulerMetrics::new().unwrap()),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(tcp::serve(listener, dispatcher.clone(), CancellationToken::new()));

        Harness {
            dispatcher,
            addr,
            ledger,
            finalizer,
        }
    }

    fn scene(&self, width: u32, height: u32) -> SceneSpec {
        let spec = SceneSpec::new(Uuid::new_v4(), width, height).unwrap();
        self.dispatcher.start_scene(spec).unwrap();
        spec
    }

    async fn connect(&self) -> Worker {
        Framed::new(TcpStream::connect(self.addr).await.unwrap(), WorkerCodec::new())
    }
}

async fn next_event(worker: &mut Worker) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), worker.next())
        .await
        .expect("timed out waiting for event")
        .expect("connection closed")
        .expect("bad frame")
}

async fn next_assignment(worker: &mut Worker) -> UnitDescriptor {
    match next_event(worker).await {
        ServerEvent::UnitAssignment { unit, .. } => unit,
        other => panic!("Expected assignment, got {:?}", other),
    }
}

/// Join and echo the identity; the first assignment (if any) follows
async fn join(worker: &mut Worker, scene_id: SceneId, owner: &str) -> WorkerId {
    worker
        .send(ClientEvent::JoinScene {
            scene_id,
            owner_id: owner.to_string(),
        })
        .await
        .unwrap();

    let worker_id = match next_event(worker).await {
        ServerEvent::Identity { worker_id, .. } => worker_id,
        other => panic!("Expected identity, got {:?}", other),
    };
    worker
        .send(ClientEvent::Registered {
            scene_id,
            worker_id: worker_id.clone(),
        })
        .await
        .unwrap();
    worker_id
}

fn render(spec: &SceneSpec, unit: &UnitDescriptor) -> Vec<Pixel> {
    (unit.start..unit.end)
        .map(|index| {
            let (x, y) = spec.coordinates(index).unwrap();
            Pixel { x, y, r: 0.25, g: 0.5, b: 0.75 }
        })
        .collect()
}

async fn submit(worker: &mut Worker, spec: &SceneSpec, worker_id: &WorkerId, unit: &UnitDescriptor) {
    worker
        .send(ClientEvent::UnitResult {
            scene_id: spec.id,
            worker_id: worker_id.clone(),
            unit_id: unit.id,
            pixels: render(spec, unit),
        })
        .await
        .unwrap();
}

/// Render every assignment until the scene is announced finished
async fn work_until_finished(mut worker: Worker, spec: SceneSpec, worker_id: WorkerId) -> Vec<u32> {
    let mut rendered = Vec::new();
    loop {
        match next_event(&mut worker).await {
            ServerEvent::UnitAssignment { unit, .. } => {
                submit(&mut worker, &spec, &worker_id, &unit).await;
                rendered.push(unit.id);
            }
            ServerEvent::SceneFinished { scene_id, artifact } => {
                assert_eq!(scene_id, spec.id);
                assert_eq!(artifact, Some(format!("{}.png", spec.id)));
                return rendered;
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}

async fn wait_until_inactive(dispatcher: &Dispatcher, scene_id: &SceneId) {
    for _ in 0..200 {
        if !dispatcher.is_active(scene_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Scene {} still active", scene_id);
}

#[tokio::test]
async fn test_two_workers_render_scene() {
    let harness = Harness::start(SchedulingConfig {
        chunk_size: 1000,
        tolerance_secs: 30,
    })
    .await;
    let spec = harness.scene(100, 40);

    let mut a = harness.connect().await;
    let mut b = harness.connect().await;
    let a_id = join(&mut a, spec.id, "alice").await;
    let b_id = join(&mut b, spec.id, "bob").await;

    let (a_units, b_units) = tokio::join!(
        work_until_finished(a, spec, a_id),
        work_until_finished(b, spec, b_id)
    );

    let mut all: Vec<u32> = a_units.into_iter().chain(b_units).collect();
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2, 3]);

    wait_until_inactive(&harness.dispatcher, &spec.id).await;
    let scenes = harness.finalizer.scenes.lock();
    assert_eq!(scenes.len(), 1);
    let covered: usize = scenes[0].units.iter().map(|u| u.pixels.len()).sum();
    assert_eq!(covered as u64, spec.total_pixels());
    assert_eq!(*harness.ledger.joined.lock(), 2);
}

#[tokio::test]
async fn test_disconnect_hands_unit_to_remaining_worker() {
    let harness = Harness::start(SchedulingConfig {
        chunk_size: 100,
        tolerance_secs: 30,
    })
    .await;
    let spec = harness.scene(20, 10);

    let mut a = harness.connect().await;
    join(&mut a, spec.id, "alice").await;
    assert_eq!(next_assignment(&mut a).await.id, 0);

    let mut b = harness.connect().await;
    let b_id = join(&mut b, spec.id, "bob").await;
    assert_eq!(next_assignment(&mut b).await.id, 1);

    drop(a);

    let unit = UnitDescriptor { id: 1, start: 100, end: 200 };
    submit(&mut b, &spec, &b_id, &unit).await;
    assert_eq!(work_until_finished(b, spec, b_id).await, vec![0]);

    wait_until_inactive(&harness.dispatcher, &spec.id).await;
    assert_eq!(*harness.ledger.left.lock(), 1);
    assert_eq!(harness.finalizer.scenes.lock().len(), 1);
}

#[tokio::test]
async fn test_events_for_foreign_worker_are_ignored() {
    let harness = Harness::start(SchedulingConfig {
        chunk_size: 100,
        tolerance_secs: 30,
    })
    .await;
    let spec = harness.scene(20, 10);

    let mut a = harness.connect().await;
    let a_id = join(&mut a, spec.id, "alice").await;
    let unit = next_assignment(&mut a).await;

    // a second connection tries to submit on alice's behalf
    let mut mallory = harness.connect().await;
    submit(&mut mallory, &spec, &a_id, &unit).await;
    join(&mut mallory, spec.id, "mallory").await;

    let progress = harness.dispatcher.progress(spec.id).await.unwrap();
    assert_eq!(progress.units_completed, 0);
    assert_eq!(progress.workers, 2);
}

#[tokio::test]
async fn test_timed_out_unit_goes_to_idle_worker() {
    let harness = Harness::start(SchedulingConfig {
        chunk_size: 2500,
        tolerance_secs: 1,
    })
    .await;
    let spec = harness.scene(3, 3);

    let mut slow = harness.connect().await;
    let slow_id = join(&mut slow, spec.id, "slow").await;
    let unit = next_assignment(&mut slow).await;

    // nothing left to hand out until the slow worker's unit expires
    let mut fast = harness.connect().await;
    let fast_id = join(&mut fast, spec.id, "fast").await;
    assert_eq!(next_assignment(&mut fast).await, unit);

    submit(&mut fast, &spec, &fast_id, &unit).await;
    assert!(matches!(next_event(&mut fast).await, ServerEvent::SceneFinished { .. }));
    assert!(matches!(next_event(&mut slow).await, ServerEvent::SceneFinished { .. }));

    // the straggler's result arrives after the scene is gone
    submit(&mut slow, &spec, &slow_id, &unit).await;
    wait_until_inactive(&harness.dispatcher, &spec.id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.finalizer.scenes.lock().len(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_listener_and_scenes() {
    let ledger = Arc::new(RecordingLedger::default());
    let dispatcher = Arc::new(Dispatcher::new(
        SchedulingConfig::default(),
        ledger,
        Arc::new(RecordingFinalizer::default()),
        Arc::new(SchedulerMetrics::new().unwrap()),
    ));
    let spec = SceneSpec::new(Uuid::new_v4(), 100, 100).unwrap();
    dispatcher.start_scene(spec).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(tcp::serve(listener, dispatcher.clone(), shutdown.clone()));

    // cancellation is sticky, so a listener busy accepting still sees it
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("listener did not stop")
        .unwrap();

    assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
    assert_eq!(dispatcher.active_count(), 0);
}
