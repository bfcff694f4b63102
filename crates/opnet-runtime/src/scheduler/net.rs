//! The asynchronous net engine.
//!
//! [`AsyncNet`] takes a net definition plus its operators, plans chains, and
//! drives them to completion over the device worker pools. Dispatch is
//! callback-driven: every root chain is enqueued on its device's pool, and
//! each chain's completion callback decrements its children's parent
//! counters, enqueueing a child once its counter reaches zero and the event
//! policy admits it. A failing chain poisons its descendants; unrelated
//! chains keep running and the first captured operator error is re-raised by
//! [`AsyncNet::handle_run_error`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use opnet_core::{
    DeviceOption, DeviceType, Event, EventStatus, NetDef, NetError, NetResult, Operator,
    OperatorNode,
};

use crate::scheduler::chains::{self, ChainNode};
use crate::scheduler::options::{ExecutionOptions, NetOptions};
use crate::scheduler::pools::{pool_registry, TaskPool};
use crate::scheduler::stats::{OpCost, OperatorStats, ProfilingCounters};
use crate::scheduler::stream;

/// Two-level pool cache: device id, then pool size.
type PoolsMap = HashMap<i32, HashMap<usize, Arc<dyn TaskPool>>>;

#[derive(Default)]
struct PoolCaches {
    cpu: PoolsMap,
    gpu: PoolsMap,
}

#[derive(Default)]
struct RunFlag {
    started: bool,
    running: bool,
}

/// Asynchronous execution engine for one operator net.
///
/// The graph structure is immutable after construction; per-run state is
/// cleared by [`AsyncNet::reset`] at the start of every iteration. The
/// engine holds a weak handle to itself so completion callbacks, which
/// outlive the caller's stack frame, can keep it alive.
pub struct AsyncNet {
    self_handle: Weak<AsyncNet>,
    name: String,
    options: ExecutionOptions,
    net_options: NetOptions,
    nodes: Vec<OperatorNode>,
    chains: Vec<Vec<usize>>,
    chain_nodes: Vec<ChainNode>,
    /// Pool-size key derived from the net's `num_workers`; 0 lets the
    /// factory pick its default.
    pool_size: usize,
    pools: Mutex<PoolCaches>,
    success: AtomicBool,
    caught_error: Mutex<Option<NetError>>,
    processed_tasks: AtomicUsize,
    run_flag: Mutex<RunFlag>,
    run_finished: Condvar,
    counters: ProfilingCounters,
}

impl AsyncNet {
    /// Build an engine from a net definition and its operators.
    ///
    /// `operators[i]` implements `def.ops[i]`. Chains are planned here and
    /// inner chain events are disabled unless profiling keeps them.
    ///
    /// # Errors
    ///
    /// Fails on invalid options, an invalid or cyclic definition, or an
    /// operator-count mismatch.
    pub fn new(
        def: &NetDef,
        operators: Vec<Arc<dyn Operator>>,
        net_options: NetOptions,
    ) -> NetResult<Arc<Self>> {
        net_options
            .validate()
            .map_err(|message| NetError::Net { message })?;
        def.validate().map_err(|message| NetError::Net { message })?;
        if def.ops.len() != operators.len() {
            return Err(NetError::Net {
                message: format!(
                    "net '{}' defines {} ops but received {} operators",
                    def.name,
                    def.ops.len(),
                    operators.len()
                ),
            });
        }

        let options =
            ExecutionOptions::for_net_type(&def.net_type, &net_options, def.enable_profiling);

        let devices: Vec<DeviceOption> =
            operators.iter().map(|op| *op.device_option()).collect();
        let parents: Vec<Vec<usize>> = def.ops.iter().map(|op| op.parents.clone()).collect();
        let planned = if net_options.inference_mode {
            chains::compute_inference_chain(&parents)?
        } else {
            chains::compute_chains(&devices, &parents)?
        };

        // Only head and tail events take part in cross-chain
        // synchronization; inner events are kept solely as profiling
        // bookends.
        if !options.report_stats {
            for chain in &planned.chains {
                if chain.len() > 2 {
                    for &op_id in &chain[1..chain.len() - 1] {
                        operators[op_id].disable_event();
                    }
                }
            }
        }

        let counters = ProfilingCounters::new(
            options.report_stats,
            def.ops.iter().map(|op| op.op_type.clone()).collect(),
        );

        let requested_workers = def.num_workers.unwrap_or(0);
        let pool_size = if requested_workers > 0 {
            requested_workers
        } else {
            net_options.cpu_pool_size
        };

        debug!(
            net = %def.name,
            chains = planned.len(),
            ops = operators.len(),
            "constructed async net"
        );

        Ok(Arc::new_cyclic(|weak| Self {
            self_handle: weak.clone(),
            name: def.name.clone(),
            options,
            net_options,
            nodes: operators.into_iter().map(OperatorNode::new).collect(),
            chains: planned.chains,
            chain_nodes: planned.chain_nodes,
            pool_size,
            pools: Mutex::new(PoolCaches::default()),
            success: AtomicBool::new(true),
            caught_error: Mutex::new(None),
            processed_tasks: AtomicUsize::new(0),
            run_flag: Mutex::new(RunFlag::default()),
            run_finished: Condvar::new(),
            counters,
        }))
    }

    /// Net name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of chains.
    pub fn tasks_num(&self) -> usize {
        self.chains.len()
    }

    /// Number of operators in a chain.
    pub fn num_ops(&self, task_id: usize) -> usize {
        self.chains[task_id].len()
    }

    /// Parent chains of `task_id`, sorted by task id.
    pub fn parents(&self, task_id: usize) -> &[usize] {
        &self.chain_nodes[task_id].parents
    }

    /// Child chains of `task_id`, sorted by task id.
    pub fn children(&self, task_id: usize) -> &[usize] {
        &self.chain_nodes[task_id].children
    }

    /// The chain's completion event (its tail operator's event).
    pub fn event(&self, task_id: usize) -> &Event {
        self.operator(self.last_op_id(task_id)).event()
    }

    /// Status of the chain's completion event.
    pub fn query(&self, task_id: usize) -> EventStatus {
        self.event(task_id).query()
    }

    /// Remaining unfulfilled parents of a chain.
    pub fn get_parent_count(&self, task_id: usize) -> i64 {
        self.head_node(task_id).parent_count()
    }

    /// Atomically decrement a chain's parent counter.
    ///
    /// # Panics
    ///
    /// Panics if the counter goes negative: that means the chain DAG and the
    /// runtime counters disagree, which is engine corruption.
    pub fn update_parent_count(&self, task_id: usize) -> i64 {
        let parent_count = self.head_node(task_id).decrement_parent_count();
        assert!(
            parent_count >= 0,
            "parent count of task {} dropped below zero",
            task_id
        );
        parent_count
    }

    /// Mark the chain dispatched; `true` exactly once per run.
    pub fn test_and_set_scheduled(&self, task_id: usize) -> bool {
        self.head_node(task_id).test_and_set_scheduled()
    }

    /// Whether every parent of `task_id` admits dispatch under the event
    /// policy.
    ///
    /// `status` substitutes a snapshot of per-task statuses for live event
    /// queries. A `Failed` parent sets `parent_failed` and returns `false`.
    pub fn can_schedule(
        &self,
        task_id: usize,
        status: Option<&[EventStatus]>,
        mut parent_failed: Option<&mut bool>,
    ) -> bool {
        let first_op = self.operator(self.first_op_id(task_id));
        let child_type = first_op.event().device_type();
        let child_supports_async = first_op.supports_async_scheduling();
        for &parent_id in self.parents(task_id) {
            let parent_event = self.event(parent_id);
            let parent_status = match status {
                Some(snapshot) => snapshot[parent_id],
                None => parent_event.query(),
            };

            if parent_status == EventStatus::Failed {
                if let Some(flag) = parent_failed.as_deref_mut() {
                    *flag = true;
                }
                return false;
            }

            if !Event::can_schedule(
                parent_event.device_type(),
                parent_status,
                child_type,
                child_supports_async,
            ) {
                return false;
            }
        }
        true
    }

    /// Pairwise form of the policy check for one parent/child pair.
    pub fn can_schedule_pair(&self, parent_id: usize, child_id: usize) -> bool {
        let parent_event = self.event(parent_id);
        let first_op = self.operator(self.first_op_id(child_id));
        Event::can_schedule(
            parent_event.device_type(),
            parent_event.query(),
            first_op.event().device_type(),
            first_op.supports_async_scheduling(),
        )
    }

    /// Clear all per-run state: events, parent counters, dispatch flags, the
    /// error slot, and the success flag.
    pub fn reset(&self) {
        for node in &self.nodes {
            node.operator().reset_event();
        }
        for task_id in 0..self.tasks_num() {
            let head = self.head_node(task_id);
            head.set_parent_count(self.parents(task_id).len());
            head.clear_scheduled();
        }
        self.success.store(true, Ordering::Release);
        *self.caught_error.lock() = None;
        self.processed_tasks.store(0, Ordering::Release);
    }

    /// Start an iteration: reset, enqueue root chains, and (for blocking
    /// presets) wait for finalization. Returns the success flag.
    pub fn run_async(&self) -> bool {
        debug!(net = %self.name, "starting net iteration");
        self.counters.begin_iteration();
        self.reset();
        self.do_run_async()
    }

    fn do_run_async(&self) -> bool {
        {
            let mut flag = self.run_flag.lock();
            flag.started = true;
            flag.running = true;
        }

        if self.tasks_num() == 0 {
            self.finish_run();
        } else {
            for task_id in 0..self.tasks_num() {
                if self.parents(task_id).is_empty() {
                    self.schedule(task_id);
                }
            }
        }

        if self.options.is_blocking {
            self.wait();
        }
        self.succeeded()
    }

    /// Block until every chain has been processed, then finalize events.
    ///
    /// No-op before the first run. Non-blocking presets must call this
    /// before reading results or starting the next iteration.
    pub fn wait(&self) {
        let mut flag = self.run_flag.lock();
        if !flag.started {
            return;
        }
        while flag.running {
            self.run_finished.wait(&mut flag);
        }
        drop(flag);
        self.finalize_events();
    }

    /// Overall outcome of the current run so far.
    pub fn succeeded(&self) -> bool {
        self.success.load(Ordering::Acquire)
    }

    /// Re-raise the first captured operator error, if any; otherwise return
    /// the success flag.
    pub fn handle_run_error(&self) -> NetResult<bool> {
        if let Some(err) = self.caught_error.lock().as_ref() {
            return Err(err.clone());
        }
        Ok(self.succeeded())
    }

    /// Drive every chain's event to a terminal status: block on scheduled
    /// events, force-finish events that never ran.
    pub fn finalize_events(&self) {
        for task_id in 0..self.tasks_num() {
            match self.query(task_id) {
                EventStatus::Scheduled => self.event(task_id).finish(),
                EventStatus::Initialized => self.event(task_id).set_finished(None),
                EventStatus::Success | EventStatus::Failed => {}
            }
        }
    }

    /// Aggregated per-op-type timings recorded in profiling mode.
    pub fn get_operator_stats(&self) -> OperatorStats {
        self.counters.operator_stats()
    }

    /// Mean per-operator costs recorded in profiling mode.
    pub fn get_per_operator_cost(&self) -> Vec<OpCost> {
        self.counters.per_operator_cost()
    }

    /// Execute one chain on the given stream.
    ///
    /// Returns `false` when an operator failed or raised; the chain's
    /// completion event carries the error message either way.
    pub fn run(&self, task_id: usize, stream_id: usize) -> bool {
        if !self.options.finish_chain {
            // Parents may still be in flight; order is restored by an event
            // wait at the head of the chain.
            self.async_wait(task_id, stream_id);
        }

        for &op_id in &self.chains[task_id] {
            let op = self.operator(op_id);
            let result = if !self.options.report_stats {
                trace!(op = op_id, task = task_id, stream = stream_id, "running operator");
                op.run_async(stream_id)
            } else {
                self.counters.add_op_start(op_id);
                let result = op.run_async(stream_id);
                if matches!(result, Ok(true))
                    && !op.device_option().device_type.is_cpu_family()
                {
                    op.finish();
                }
                self.counters.add_op_end(op_id);
                result
            };

            match result {
                Ok(true) => {}
                Ok(false) => {
                    let err_msg =
                        format!("Failed to execute an op: {}", op_type_or_unknown(op.as_ref()));
                    self.set_task_error_message(task_id, &err_msg);
                    error!(task = task_id, op = op_id, "{}", err_msg);
                    return false;
                }
                Err(err) => {
                    self.store_exception(err.clone());
                    let err_msg = format!("{},  op {}", err, op_type_or_unknown(op.as_ref()));
                    self.set_task_error_message(task_id, &err_msg);
                    error!(task = task_id, op = op_id, "{}", err_msg);
                    return false;
                }
            }
        }

        if self.options.finish_chain {
            self.event(task_id).finish();
        }
        true
    }

    fn schedule(&self, task_id: usize) {
        if !self.test_and_set_scheduled(task_id) {
            return;
        }
        trace!(task = task_id, "dispatching chain");
        let device = *self.task_device(task_id);
        match self.pool(&device) {
            Ok(pool) => {
                let net = self.handle();
                pool.run(Box::new(move || net.execute_task(task_id)));
            }
            Err(err) => {
                // The chain cannot reach a worker; record the failure and
                // keep draining so the run still finalizes.
                error!(task = task_id, "cannot route chain to a pool: {}", err);
                self.store_exception(err.clone());
                self.success.store(false, Ordering::Release);
                self.set_task_error_message(task_id, &err.to_string());
                self.task_done(task_id);
            }
        }
    }

    fn execute_task(&self, task_id: usize) {
        let mut parent_failed = false;
        self.can_schedule(task_id, None, Some(&mut parent_failed));
        if parent_failed {
            self.set_task_error_message(task_id, "Cannot schedule task in case of parent failure");
            self.success.store(false, Ordering::Release);
        } else if self.succeeded() {
            let stream_id = self.stream(task_id);
            trace!(task = task_id, stream = stream_id, "executing chain");
            if !self.run(task_id, stream_id) {
                self.success.store(false, Ordering::Release);
            }
        }
        self.task_done(task_id);
    }

    fn task_done(&self, task_id: usize) {
        for &child_id in self.children(task_id) {
            let parent_count = self.update_parent_count(child_id);
            if parent_count == 0 {
                if self.options.always_schedule_child
                    || self.can_schedule(child_id, None, None)
                {
                    self.schedule(child_id);
                } else {
                    self.poll_and_schedule(child_id);
                }
            }
        }

        let processed = self.processed_tasks.fetch_add(1, Ordering::AcqRel) + 1;
        if processed == self.tasks_num() {
            self.finish_run();
        }
    }

    fn poll_and_schedule(&self, task_id: usize) {
        let mut parent_failed = false;
        let schedulable = self.can_schedule(task_id, None, Some(&mut parent_failed));
        if schedulable || parent_failed || !self.succeeded() {
            self.schedule(task_id);
            return;
        }
        let device = *self.task_device(task_id);
        match self.pool(&device) {
            Ok(pool) => {
                let net = self.handle();
                pool.run(Box::new(move || net.poll_and_schedule(task_id)));
            }
            // schedule() owns the failure bookkeeping for unroutable chains.
            Err(_) => self.schedule(task_id),
        }
    }

    fn finish_run(&self) {
        debug!(net = %self.name, "net iteration drained");
        let mut flag = self.run_flag.lock();
        flag.running = false;
        drop(flag);
        self.run_finished.notify_all();
    }

    fn async_wait(&self, task_id: usize, stream_id: usize) {
        let wait_task_ids = self.parents(task_id);
        if wait_task_ids.is_empty() {
            return;
        }
        let events: Vec<&Event> = wait_task_ids.iter().map(|&id| self.event(id)).collect();
        self.operator(self.first_op_id(task_id))
            .wait_events(&events, stream_id);
    }

    fn stream(&self, task_id: usize) -> usize {
        let device = self.task_device(task_id);
        if device.device_type != DeviceType::Gpu {
            return 0;
        }
        let gpu_id = device.device_id.unwrap_or(0).max(0) as usize;
        let last_op = self.operator(self.last_op_id(task_id));
        stream::next_stream(
            gpu_id,
            self.options.streams_per_gpu,
            self.options.check_stream_status,
            |stream_id| last_op.is_stream_free(stream_id),
        )
    }

    fn pool(&self, device: &DeviceOption) -> NetResult<Arc<dyn TaskPool>> {
        if self.options.use_single_pool {
            return self.pool_getter("cpu", -1, self.pool_size);
        }

        let device_type = device.device_type;
        if device_type.is_cpu_family() {
            let numa_node_id = device.device_id.unwrap_or(-1);
            if device.device_id.is_some()
                && !(0..self.net_options.max_numa_nodes).contains(&numa_node_id)
            {
                return Err(NetError::InvalidDeviceId {
                    device_type,
                    device_id: numa_node_id,
                    max: self.net_options.max_numa_nodes,
                });
            }
            self.pool_getter("cpu", numa_node_id, self.pool_size)
        } else if device_type == DeviceType::Gpu {
            let gpu_id = device.device_id.unwrap_or(0);
            if !(0..self.net_options.max_gpus).contains(&gpu_id) {
                return Err(NetError::InvalidDeviceId {
                    device_type,
                    device_id: gpu_id,
                    max: self.net_options.max_gpus,
                });
            }
            self.pool_getter("gpu", gpu_id, self.pool_size)
        } else {
            Err(NetError::UnsupportedDevice { device_type })
        }
    }

    fn pool_getter(
        &self,
        family: &str,
        device_id: i32,
        pool_size: usize,
    ) -> NetResult<Arc<dyn TaskPool>> {
        let mut caches = self.pools.lock();
        let cache = if family == "cpu" {
            &mut caches.cpu
        } else {
            &mut caches.gpu
        };
        if let Some(pool) = cache.get(&device_id).and_then(|sizes| sizes.get(&pool_size)) {
            return Ok(Arc::clone(pool));
        }
        let pool =
            pool_registry().create(family, device_id, pool_size, self.options.use_per_net_pools)?;
        cache
            .entry(device_id)
            .or_default()
            .insert(pool_size, Arc::clone(&pool));
        Ok(pool)
    }

    fn store_exception(&self, err: NetError) {
        let mut slot = self.caught_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn set_task_error_message(&self, task_id: usize, err_msg: &str) {
        if self.query(task_id) == EventStatus::Initialized {
            self.event(task_id).set_finished(Some(err_msg));
        }
    }

    fn handle(&self) -> Arc<Self> {
        // A live `&self` implies at least one strong reference.
        self.self_handle
            .upgrade()
            .expect("async net dropped while scheduling")
    }

    fn head_node(&self, task_id: usize) -> &OperatorNode {
        &self.nodes[self.first_op_id(task_id)]
    }

    fn operator(&self, op_id: usize) -> &Arc<dyn Operator> {
        self.nodes[op_id].operator()
    }

    fn first_op_id(&self, task_id: usize) -> usize {
        self.chains[task_id][0]
    }

    fn last_op_id(&self, task_id: usize) -> usize {
        let chain = &self.chains[task_id];
        chain[chain.len() - 1]
    }

    fn task_device(&self, task_id: usize) -> &DeviceOption {
        self.operator(self.last_op_id(task_id)).device_option()
    }
}

/// The leading space in the fallback is load-bearing: error messages
/// concatenate it directly, e.g. `"Failed to execute an op:  unknown"`.
fn op_type_or_unknown(op: &dyn Operator) -> &str {
    let op_type = op.op_type();
    if op_type.is_empty() {
        " unknown"
    } else {
        op_type
    }
}
