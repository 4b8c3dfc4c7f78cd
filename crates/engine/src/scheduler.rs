use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use rollcall_proto::topic;
use tokio::task::JoinSet;

use crate::api::DispatchEvent;
use crate::batch::Task;
use crate::driver::CoordinatorInner;
use crate::registry::WorkerSlot;
use crate::results::ResultLog;

/// Pause between free-worker sweeps in dynamic mode.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);
/// Poll interval while waiting for in-flight dispatches to finish.
const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// What a scheduling run amounted to.
pub(crate) struct SchedulerOutcome {
    /// Frames the policy intended to dispatch.
    pub(crate) scheduled: usize,
    /// Workers whose dialog failed, ascending and deduplicated.
    pub(crate) failed_workers: Vec<u32>,
}

/// Contiguous per-worker slices: worker `i` gets
/// `tasks[i * (total / workers) .. (i + 1) * (total / workers)]`.
/// The division remainder is never dispatched.
fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
    let per = total / workers;
    (0..workers)
        .map(|index| index * per..(index + 1) * per)
        .collect()
}

pub(crate) async fn run_static(
    tasks: Vec<Task>,
    slots: Vec<Arc<WorkerSlot>>,
    results: Arc<ResultLog>,
    inner: Arc<CoordinatorInner>,
) -> SchedulerOutcome {
    let slices = partition(tasks.len(), slots.len());
    let scheduled: usize = slices.iter().map(|range| range.len()).sum();
    if scheduled < tasks.len() {
        inner.emit(DispatchEvent::TasksDropped {
            count: tasks.len() - scheduled,
        });
    }

    let mut join: JoinSet<Result<u32, u32>> = JoinSet::new();
    let mut failed: Vec<u32> = Vec::new();
    for (slot, range) in slots.iter().zip(slices) {
        if slot.is_failed() {
            // Lost at mode announcement; its slice is lost with it.
            failed.push(slot.id);
            continue;
        }
        let slot = Arc::clone(slot);
        let slice = tasks[range].to_vec();
        let results = Arc::clone(&results);
        let inner = Arc::clone(&inner);
        join.spawn(async move {
            let id = slot.id;
            match static_dispatch(&slot, slice, &results, &inner).await {
                Ok(()) => Ok(id),
                Err(err) => {
                    slot.mark_failed();
                    inner.emit(DispatchEvent::WorkerFailed {
                        worker_id: id,
                        message: format!("{}: {err:#}", slot.name),
                    });
                    Err(id)
                }
            }
        });
    }

    while let Some(res) = join.join_next().await {
        match res {
            Ok(Ok(_)) => {}
            Ok(Err(id)) => failed.push(id),
            Err(err) => inner.emit(DispatchEvent::Error {
                message: format!("dispatch task join error: {err:#}"),
            }),
        }
    }

    failed.sort_unstable();
    failed.dedup();
    SchedulerOutcome {
        scheduled,
        failed_workers: failed,
    }
}

/// T1..T3 for one worker: announce the slice length, then send each
/// frame and wait for its result before the next.
async fn static_dispatch(
    slot: &WorkerSlot,
    slice: Vec<Task>,
    results: &ResultLog,
    inner: &CoordinatorInner,
) -> anyhow::Result<()> {
    let mut conn = slot.conn.lock().await;
    conn.send(
        topic::STATIC_IMAGES_COUNT,
        Some(&slice.len().to_string()),
        None,
    )
    .await?;

    for task in &slice {
        if inner.should_stop() {
            anyhow::bail!("interrupted before frame [{}]", task.timestamp);
        }

        conn.send(topic::STATIC_IMAGE, Some(&task.timestamp), Some(&task.image))
            .await?;
        inner.emit(DispatchEvent::TaskSent {
            worker_id: slot.id,
            timestamp: task.timestamp.clone(),
        });

        let reply = conn.expect(topic::PROCESSED_DATA, None).await?;
        let record = reply.message_json()?;
        let recorded = results.append(record).await?;
        inner.emit(DispatchEvent::ResultRecorded {
            worker_id: slot.id,
            recorded,
        });
    }

    Ok(())
}

pub(crate) async fn run_dynamic(
    tasks: Vec<Task>,
    slots: Vec<Arc<WorkerSlot>>,
    results: Arc<ResultLog>,
    inner: Arc<CoordinatorInner>,
) -> SchedulerOutcome {
    let scheduled = tasks.len();
    let mut queue: VecDeque<Task> = tasks.into();
    let mut join: JoinSet<Result<u32, u32>> = JoinSet::new();
    let mut failed: Vec<u32> = Vec::new();

    while !queue.is_empty() {
        if inner.should_stop() {
            break;
        }
        if slots.iter().all(|slot| slot.is_failed()) {
            break;
        }

        // Sweep the roster in id order; lower ids get first pick.
        for slot in &slots {
            if queue.is_empty() {
                break;
            }
            if slot.is_failed() || !slot.try_claim() {
                continue;
            }

            let Some(task) = queue.pop_front() else {
                slot.release();
                break;
            };
            let slot = Arc::clone(slot);
            let results = Arc::clone(&results);
            let inner = Arc::clone(&inner);
            join.spawn(async move { dynamic_assignment(slot, task, &results, &inner).await });
        }

        while let Some(res) = join.try_join_next() {
            note_assignment(res, &mut failed, &inner);
        }
        tokio::time::sleep(SWEEP_INTERVAL).await;
    }

    // Drain: wait until nothing is in flight any more.
    loop {
        while let Some(res) = join.try_join_next() {
            note_assignment(res, &mut failed, &inner);
        }
        if !slots.iter().any(|slot| slot.in_flight()) {
            break;
        }
        tokio::time::sleep(DRAIN_INTERVAL).await;
    }
    while let Some(res) = join.join_next().await {
        note_assignment(res, &mut failed, &inner);
    }

    // End every surviving worker's task loop.
    for slot in &slots {
        if slot.is_failed() {
            continue;
        }
        let mut conn = slot.conn.lock().await;
        if let Err(err) = conn
            .send(topic::DYNAMIC_TASK, Some(topic::DONE_SENTINEL), None)
            .await
        {
            slot.mark_failed();
            let err = anyhow::Error::from(err);
            inner.emit(DispatchEvent::WorkerFailed {
                worker_id: slot.id,
                message: format!("{}: {err:#}", slot.name),
            });
            failed.push(slot.id);
        }
    }

    if !queue.is_empty() {
        inner.emit(DispatchEvent::Error {
            message: format!("{} tasks were never dispatched", queue.len()),
        });
    }

    failed.sort_unstable();
    failed.dedup();
    SchedulerOutcome {
        scheduled,
        failed_workers: failed,
    }
}

/// D1..D2 for one assignment. The busy flag is held for exactly the
/// lifetime of this request/response.
async fn dynamic_assignment(
    slot: Arc<WorkerSlot>,
    task: Task,
    results: &ResultLog,
    inner: &CoordinatorInner,
) -> Result<u32, u32> {
    let outcome = async {
        let mut conn = slot.conn.lock().await;
        conn.send(topic::DYNAMIC_TASK, Some(&task.timestamp), Some(&task.image))
            .await?;
        inner.emit(DispatchEvent::TaskSent {
            worker_id: slot.id,
            timestamp: task.timestamp.clone(),
        });

        let reply = conn.expect(topic::PROCESSED_DATA, None).await?;
        let record = reply.message_json()?;
        let recorded = results.append(record).await?;
        inner.emit(DispatchEvent::ResultRecorded {
            worker_id: slot.id,
            recorded,
        });
        anyhow::Ok(())
    }
    .await;

    match outcome {
        Ok(()) => {
            slot.release();
            Ok(slot.id)
        }
        Err(err) => {
            // The task is lost with the worker; undispatched frames
            // stay in the queue for the survivors.
            slot.mark_failed();
            slot.release();
            inner.emit(DispatchEvent::WorkerFailed {
                worker_id: slot.id,
                message: format!("{}: {err:#}", slot.name),
            });
            Err(slot.id)
        }
    }
}

fn note_assignment(
    res: Result<Result<u32, u32>, tokio::task::JoinError>,
    failed: &mut Vec<u32>,
    inner: &CoordinatorInner,
) {
    match res {
        Ok(Ok(_)) => {}
        Ok(Err(id)) => failed.push(id),
        Err(err) => inner.emit(DispatchEvent::Error {
            message: format!("assignment task join error: {err:#}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::partition;

    #[test]
    fn partition_covers_a_prefix_and_drops_the_remainder() {
        let slices = partition(5, 2);
        assert_eq!(slices, vec![0..2, 2..4]);

        // The union of slices is exactly the first N * (F / N) tasks.
        let covered: usize = slices.iter().map(|r| r.len()).sum();
        assert_eq!(covered, 4);

        assert_eq!(partition(6, 3), vec![0..2, 2..4, 4..6]);
        assert_eq!(partition(2, 3), vec![0..0, 0..0, 0..0]);
    }
}
