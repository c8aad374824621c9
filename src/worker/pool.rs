use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{CalcError, Result};
use crate::expression::{ExpressionPart, Operator};

/// Computes `first <op> second` inside a calculation unit.
pub type Evaluator = fn(Operator, f64, f64) -> f64;

fn apply_operator(op: Operator, first: f64, second: f64) -> f64 {
    op.apply(first, second)
}

#[derive(Debug, Default)]
struct UnitState {
    busy: AtomicBool,
    completed: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time view of one calculation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitStats {
    pub id: usize,
    pub busy: bool,
    pub completed: u64,
    pub restarts: u64,
}

/// Fixed set of calculation units fed from one bounded queue.
///
/// Units pull the next sub-task when they become free, so a unit never holds
/// more than one task and submitters wait on the queue instead of spinning.
/// Each unit runs under a supervisor that restarts it if it panics; the
/// in-flight sub-task is lost and its caller sees the result channel close.
pub struct CalculationPool {
    task_tx: mpsc::Sender<ExpressionPart>,
    units: Vec<Arc<UnitState>>,
    supervisors: Vec<JoinHandle<()>>,
}

impl CalculationPool {
    pub fn new(size: usize) -> Self {
        Self::with_evaluator(size, apply_operator)
    }

    pub fn with_evaluator(size: usize, evaluator: Evaluator) -> Self {
        let size = size.max(1);
        let (task_tx, task_rx) = mpsc::channel(size);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let units: Vec<Arc<UnitState>> = (0..size).map(|_| Arc::new(UnitState::default())).collect();
        let supervisors = units
            .iter()
            .enumerate()
            .map(|(id, state)| {
                tokio::spawn(supervise_unit(id, task_rx.clone(), state.clone(), evaluator))
            })
            .collect();

        tracing::debug!(units = size, "Calculation pool started");
        Self {
            task_tx,
            units,
            supervisors,
        }
    }

    /// Queue a sub-task, waiting while every unit is busy and the queue is full.
    pub async fn submit(&self, part: ExpressionPart) -> Result<()> {
        self.task_tx.send(part).await.map_err(|_| CalcError::PoolClosed)
    }

    pub fn size(&self) -> usize {
        self.units.len()
    }

    pub fn stats(&self) -> Vec<UnitStats> {
        self.units
            .iter()
            .enumerate()
            .map(|(id, state)| UnitStats {
                id,
                busy: state.busy.load(Ordering::SeqCst),
                completed: state.completed.load(Ordering::SeqCst),
                restarts: state.restarts.load(Ordering::SeqCst),
            })
            .collect()
    }

    pub fn busy_units(&self) -> usize {
        self.units
            .iter()
            .filter(|s| s.busy.load(Ordering::SeqCst))
            .count()
    }
}

impl Drop for CalculationPool {
    fn drop(&mut self) {
        for supervisor in &self.supervisors {
            supervisor.abort();
        }
    }
}

async fn supervise_unit(
    id: usize,
    task_rx: Arc<Mutex<mpsc::Receiver<ExpressionPart>>>,
    state: Arc<UnitState>,
    evaluator: Evaluator,
) {
    loop {
        let unit = tokio::spawn(run_unit(id, task_rx.clone(), state.clone(), evaluator));
        match unit.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                state.busy.store(false, Ordering::SeqCst);
                let restarts = state.restarts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::error!(unit = id, restarts, "Calculation unit crashed, restarting");
            }
            Err(_) => break,
        }
    }
    tracing::debug!(unit = id, "Calculation unit stopped");
}

async fn run_unit(
    id: usize,
    task_rx: Arc<Mutex<mpsc::Receiver<ExpressionPart>>>,
    state: Arc<UnitState>,
    evaluator: Evaluator,
) {
    loop {
        // Only the unit waiting for work holds the lock; it is released
        // before the task is evaluated.
        let part = task_rx.lock().await.recv().await;
        let Some(part) = part else {
            break;
        };

        let was_busy = state.busy.swap(true, Ordering::SeqCst);
        debug_assert!(!was_busy, "calculation unit received a task while busy");
        tracing::debug!(
            unit = id,
            expression_id = %part.expression_id,
            op = %part.operator,
            "Calculation unit got task"
        );

        tokio::time::sleep(part.duration).await;
        let value = evaluator(part.operator, part.first, part.second);

        state.completed.fetch_add(1, Ordering::SeqCst);
        state.busy.store(false, Ordering::SeqCst);
        tracing::debug!(unit = id, value, "Calculation unit solved task");

        if part.result_tx.send(value).is_err() {
            tracing::debug!(unit = id, expression_id = %part.expression_id, "Sub-task caller went away");
        }
    }
}
