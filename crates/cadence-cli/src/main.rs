mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::observability::init_tracing;
use cadence_core::{
    Activity, ActivityHooks, BoxError, Operation, QueueError, Scheduler, TaskQueue,
};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::CadenceConfig;

/// Hooks of the demo panel: pretend to load and release resources.
struct PanelHooks;

#[async_trait]
impl ActivityHooks for PanelHooks {
    async fn before_active(&self) -> Result<(), BoxError> {
        info!("panel: loading resources");
        sleep(Duration::from_millis(20)).await;
        Ok(())
    }

    async fn before_inactive(&self) -> Result<(), BoxError> {
        info!("panel: releasing resources");
        sleep(Duration::from_millis(10)).await;
        Ok(())
    }
}

fn print_counts(queue: &TaskQueue) -> Result<(), BoxError> {
    let counts = serde_json::to_string(&queue.counts())?;
    println!("{}: {counts}", queue.name());
    Ok(())
}

/// Render-style queue: repeated paints collapse into one keyed task.
async fn render_demo(scheduler: &Scheduler, config: &CadenceConfig) -> Result<(), BoxError> {
    let render = scheduler.create_queue("render", false, config.queue("render"));

    for frame in 0..3 {
        render.add_or_replace(
            "paint",
            Operation::sync(move |_| {
                println!("paint frame {frame}");
                Ok(())
            }),
            0,
        )?;
    }
    render.add(
        Operation::sync(|_| {
            println!("update layout");
            Ok(())
        }),
        1,
    )?;

    render.wait(0).await?;
    print_counts(&render)
}

/// Parallel queue with a timeout: failures are collected, not reported.
async fn io_demo(scheduler: &Scheduler, config: &CadenceConfig) -> Result<(), BoxError> {
    let io = scheduler.create_queue("io", false, config.queue("io"));

    for n in 0..6u64 {
        io.add_default(Operation::future(move |handle| async move {
            tokio::select! {
                _ = handle.cancelled() => return Ok(()),
                _ = sleep(Duration::from_millis(30 * n)) => {}
            }
            if n == 4 {
                return Err(format!("fetch {n} failed").into());
            }
            println!("fetched {n}");
            Ok(())
        }))?;
    }

    match io.wait(0).await {
        Ok(()) => {}
        Err(QueueError::Collected { failures, .. }) => {
            for failure in &failures {
                warn!(error = %failure, "io task failed");
            }
        }
        Err(e) => return Err(e.into()),
    }
    print_counts(&io)
}

/// Activity whose queue only runs while the panel is active.
async fn activity_demo(scheduler: &Scheduler) -> Result<(), BoxError> {
    let panel = Activity::new(scheduler, "panel", Arc::new(PanelHooks));
    let mut events = panel.subscribe();
    let queue = panel.create_active_task_queue(Default::default());

    queue.add_default(Operation::sync(|_| {
        println!("panel work ran");
        Ok(())
    }))?;
    print_counts(&queue)?;

    // the second request joins the first
    let first = panel.activate();
    let second = panel.activate();
    first.await?;
    second.await?;
    queue.wait(0).await?;

    // deactivate immediately cancels a queued activation
    panel.deactivate().await?;
    let cancelled = panel.activate();
    panel.deactivate().await?;
    if let Err(e) = cancelled.await {
        info!(error = %e, "activation superseded");
    }

    panel.unlink();
    while let Ok(event) = events.try_recv() {
        println!("panel event: {}", serde_json::to_string(&event)?);
    }
    print_counts(&queue)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing("info");

    let config = match std::env::args().nth(1) {
        Some(path) => CadenceConfig::load(&PathBuf::from(path))?,
        None => CadenceConfig::demo(),
    };

    let scheduler = Scheduler::new();
    render_demo(&scheduler, &config).await?;
    io_demo(&scheduler, &config).await?;
    activity_demo(&scheduler).await?;

    info!(queues = ?scheduler.queue_names(), "demo finished");
    Ok(())
}
