//! The non-real-time event worker.
//!
//! The dispatcher owns the high-level [`Event`] queues, converts between
//! `Event`s and [`RtEvent`]s, serializes every mutation of the audio graph
//! and the connection tables, and fans notifications out to subscribers.
//!
//! It normally runs on its own thread, waking every [`THREAD_PERIODICITY`]
//! or when new work arrives. Embedders that want deterministic, synchronous
//! operation (tests, offline rendering) can skip [`run()`](EventDispatcher::run)
//! and pump [`run_once()`](EventDispatcher::run_once) themselves.
//!
//! # Flow control
//!
//! When the RT input fifo is full, convertible events are retained and
//! retried on the next tick — the audio thread is never blocked and the
//! events are never reordered relative to each other. When a poster's queue
//! is backed up, the oldest notification for that poster is dropped and its
//! drop counter incremented.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::engine::EngineRoutingTable;
use crate::event::{
    AsyncJob, CompletionCallback, Event, EventPayload, EventStatus, EventTime,
};
use crate::fifo::RtEventFifo;
use crate::frontend::PluginLoader;
use crate::processor::{ObjectId, Processor};
use crate::registry::{ProcessorInfo, ProcessorRegistry};
use crate::rt_event::RtEvent;
use crate::timing::PerformanceTimer;
use crate::track::Track;

/// Dispatcher tick cadence.
pub const THREAD_PERIODICITY: Duration = Duration::from_millis(1);

/// Size of the poster slot table.
pub const MAX_POSTERS: usize = 16;

/// Bound on each poster's notification queue.
const POSTER_QUEUE_CAPACITY: usize = 256;

pub type PosterId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherStatus {
    Ok,
    AlreadySubscribed,
    UnknownPoster,
}

/// A component that receives routed notification events synchronously on
/// the dispatcher thread.
pub trait EventObserver: Send + Sync {
    fn notify(&self, event: &Event);
}

struct PosterSlot {
    queue: VecDeque<Event>,
    dropped: u64,
}

struct AsyncTask {
    target: ObjectId,
    work_id: u64,
    job: AsyncJob,
    completion: Option<CompletionCallback>,
}

/// Per-tick mutable state, touched only by the thread currently pumping the
/// dispatcher.
#[derive(Default)]
struct TickState {
    /// Events scheduled for a future wall-clock time, in posting order.
    waiting: Vec<Event>,
    /// Convertible events retained because the RT input fifo was full.
    rt_pending: VecDeque<Event>,
    /// Already-built RT events (graph mutations) awaiting fifo space.
    rt_raw_pending: VecDeque<RtEvent>,
    /// Processor id → destination track for in-flight moves.
    pending_moves: HashMap<ObjectId, ObjectId>,
}

/// Cheap handle for posting events from any thread.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: Sender<Event>,
}

impl DispatcherHandle {
    pub fn post_event(&self, event: Event) -> crate::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| crate::Error::DispatcherStopped)
    }
}

pub struct EventDispatcher {
    tx: Sender<Event>,
    rx: Receiver<Event>,
    rt_input: Arc<RtEventFifo>,
    rt_output: Arc<RtEventFifo>,
    registry: Arc<ProcessorRegistry>,
    routing: Arc<EngineRoutingTable>,
    loader: Arc<dyn PluginLoader>,
    timer: Arc<PerformanceTimer>,
    sample_rate: f32,

    running: AtomicBool,
    tick: Mutex<TickState>,
    posters: Mutex<Vec<Option<PosterSlot>>>,
    keyboard_listeners: RwLock<Vec<Arc<dyn EventObserver>>>,
    parameter_listeners: RwLock<Vec<Arc<dyn EventObserver>>>,

    async_tx: Mutex<Option<Sender<AsyncTask>>>,
    async_rx: Receiver<AsyncTask>,
    next_work_id: AtomicU64,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    async_worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn new(
        rt_input: Arc<RtEventFifo>,
        rt_output: Arc<RtEventFifo>,
        registry: Arc<ProcessorRegistry>,
        routing: Arc<EngineRoutingTable>,
        loader: Arc<dyn PluginLoader>,
        timer: Arc<PerformanceTimer>,
        sample_rate: f32,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (async_tx, async_rx) = crossbeam_channel::unbounded();
        let mut posters = Vec::with_capacity(MAX_POSTERS);
        posters.resize_with(MAX_POSTERS, || None);
        Self {
            tx,
            rx,
            rt_input,
            rt_output,
            registry,
            routing,
            loader,
            timer,
            sample_rate,
            running: AtomicBool::new(true),
            tick: Mutex::new(TickState::default()),
            posters: Mutex::new(posters),
            keyboard_listeners: RwLock::new(Vec::new()),
            parameter_listeners: RwLock::new(Vec::new()),
            async_tx: Mutex::new(Some(async_tx)),
            async_rx,
            next_work_id: AtomicU64::new(1),
            worker: Mutex::new(None),
            async_worker: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn post_event(&self, event: Event) -> crate::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| crate::Error::DispatcherStopped)
    }

    // Subscription surface ---------------------------------------------------

    pub fn register_poster(&self, id: PosterId) -> DispatcherStatus {
        let mut posters = self.posters.lock();
        if id >= MAX_POSTERS {
            return DispatcherStatus::UnknownPoster;
        }
        if posters[id].is_some() {
            return DispatcherStatus::AlreadySubscribed;
        }
        posters[id] = Some(PosterSlot {
            queue: VecDeque::with_capacity(POSTER_QUEUE_CAPACITY),
            dropped: 0,
        });
        DispatcherStatus::Ok
    }

    pub fn deregister_poster(&self, id: PosterId) -> DispatcherStatus {
        let mut posters = self.posters.lock();
        match posters.get_mut(id) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                DispatcherStatus::Ok
            }
            _ => DispatcherStatus::UnknownPoster,
        }
    }

    /// Take all queued notifications for a poster.
    pub fn poll_poster(&self, id: PosterId) -> Option<Vec<Event>> {
        let mut posters = self.posters.lock();
        posters
            .get_mut(id)?
            .as_mut()
            .map(|slot| slot.queue.drain(..).collect())
    }

    /// Notifications dropped for this poster because its queue was full.
    pub fn poster_drop_count(&self, id: PosterId) -> Option<u64> {
        let posters = self.posters.lock();
        posters.get(id)?.as_ref().map(|slot| slot.dropped)
    }

    pub fn subscribe_to_keyboard_events(&self, observer: Arc<dyn EventObserver>) {
        self.keyboard_listeners.write().push(observer);
    }

    pub fn subscribe_to_parameter_notifications(&self, observer: Arc<dyn EventObserver>) {
        self.parameter_listeners.write().push(observer);
    }

    pub fn unsubscribe_from_keyboard_events(&self, observer: &Arc<dyn EventObserver>) {
        self.keyboard_listeners
            .write()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn unsubscribe_from_parameter_notifications(&self, observer: &Arc<dyn EventObserver>) {
        self.parameter_listeners
            .write()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    // Lifecycle --------------------------------------------------------------

    /// Spawn the worker and async-work threads. Idempotent.
    pub fn run(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.running.store(true, Ordering::Release);

        let dispatcher = Arc::clone(self);
        *worker = Some(
            thread::Builder::new()
                .name("vivace-dispatcher".to_owned())
                .spawn(move || {
                    info!("event dispatcher started");
                    while dispatcher.running.load(Ordering::Acquire) {
                        // Sleep until work arrives or the tick period elapses
                        match dispatcher.rx.recv_timeout(THREAD_PERIODICITY) {
                            Ok(event) => {
                                let mut state = dispatcher.tick.lock();
                                dispatcher.intake(event, &mut state);
                            }
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        }
                        dispatcher.run_once();
                    }
                    info!("event dispatcher stopped");
                })
                .expect("failed to spawn dispatcher worker"),
        );

        let dispatcher = Arc::clone(self);
        *self.async_worker.lock() = Some(
            thread::Builder::new()
                .name("vivace-async-work".to_owned())
                .spawn(move || {
                    while let Ok(task) = dispatcher.async_rx.recv() {
                        dispatcher.execute_async_task(task);
                    }
                })
                .expect("failed to spawn async worker"),
        );
    }

    fn execute_async_task(&self, task: AsyncTask) {
        if !self.running.load(Ordering::Acquire) {
            finish(task.completion, EventStatus::Aborted);
            return;
        }
        let success = (task.job)();
        let status = if success {
            EventStatus::HandledOk
        } else {
            EventStatus::Error
        };
        finish(task.completion, status);
        // Route the completion through the normal event path so the RT
        // notification is pushed from the dispatcher thread
        let _ = self.tx.send(Event::new(EventPayload::AsyncWorkCompleted {
            target: task.target,
            work_id: task.work_id,
            success,
        }));
    }

    /// Stop the worker threads, then drain pending events best-effort:
    /// unprocessed events and queued async work complete with `Aborted`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        // Disconnect the async channel so its worker drains and exits
        drop(self.async_tx.lock().take());
        if let Some(handle) = self.async_worker.lock().take() {
            let _ = handle.join();
        }

        while let Ok(mut event) = self.rx.try_recv() {
            event.complete(EventStatus::Aborted);
        }
        let mut state = self.tick.lock();
        for mut event in state.rt_pending.drain(..) {
            event.complete(EventStatus::Aborted);
        }
        for mut event in state.waiting.drain(..) {
            event.complete(EventStatus::Aborted);
        }
    }

    /// One synchronous dispatcher tick: drain the input queue, process due
    /// events, retry retained RT pushes, and drain the RT output fifo.
    pub fn run_once(&self) {
        let mut state = self.tick.lock();

        while let Ok(event) = self.rx.try_recv() {
            self.intake(event, &mut state);
        }

        self.retry_rt_pending(&mut state);
        self.process_due_events(&mut state);
        self.drain_rt_output(&mut state);
    }

    fn intake(&self, event: Event, state: &mut TickState) {
        state.waiting.push(event);
    }

    fn process_due_events(&self, state: &mut TickState) {
        let now = Instant::now();
        let mut held_back = Vec::new();
        let queued: Vec<Event> = state.waiting.drain(..).collect();

        for mut event in queued {
            if event.deadline().is_some_and(|d| d < now) {
                event.complete(EventStatus::TimedOut);
                continue;
            }
            let ready = match event.time() {
                EventTime::Immediate => true,
                EventTime::At(at) => at <= now,
            };
            if ready {
                self.handle_event(event, state);
            } else {
                held_back.push(event);
            }
        }

        state.waiting = held_back;
    }

    fn handle_event(&self, mut event: Event, state: &mut TickState) {
        if let Some(rt) = event.make_rt_event() {
            // Preserve order: nothing overtakes retained events
            if !state.rt_pending.is_empty() {
                state.rt_pending.push_back(event);
                return;
            }
            match self.rt_input.push(rt) {
                Ok(()) => event.complete(EventStatus::QueuedToRt),
                Err(_) => state.rt_pending.push_back(event),
            }
            return;
        }

        let (payload, completion) = event.take_payload_and_completion();
        self.execute_payload(payload, completion, state);
    }

    fn retry_rt_pending(&self, state: &mut TickState) {
        while let Some(rt) = state.rt_raw_pending.pop_front() {
            if let Err(rt) = self.rt_input.push(rt) {
                state.rt_raw_pending.push_front(rt);
                break;
            }
        }
        while let Some(mut event) = state.rt_pending.pop_front() {
            let rt = event
                .make_rt_event()
                .expect("only convertible events are retained");
            match self.rt_input.push(rt) {
                Ok(()) => event.complete(EventStatus::QueuedToRt),
                Err(_) => {
                    state.rt_pending.push_front(event);
                    break;
                }
            }
        }
    }

    fn push_rt(&self, rt: RtEvent, state: &mut TickState) {
        if !state.rt_raw_pending.is_empty() {
            state.rt_raw_pending.push_back(rt);
            return;
        }
        if let Err(rt) = self.rt_input.push(rt) {
            state.rt_raw_pending.push_back(rt);
        }
    }

    fn execute_payload(
        &self,
        payload: EventPayload,
        completion: Option<CompletionCallback>,
        state: &mut TickState,
    ) {
        match payload {
            EventPayload::AddTrack {
                name,
                input_busses,
                output_busses,
            } => {
                let mut track =
                    match Track::new(&name, input_busses, output_busses, Some(Arc::clone(&self.timer)))
                    {
                        Ok(track) => Box::new(track),
                        Err(error) => {
                            warn!(%error, "failed to create track");
                            finish(completion, EventStatus::Error);
                            return;
                        }
                    };
                track.configure(self.sample_rate);
                let info = ProcessorInfo {
                    id: track.id(),
                    name: name.clone(),
                    label: track.label().to_owned(),
                    track: None,
                    is_track: true,
                    parameters: Arc::clone(track.parameters()),
                };
                let id = info.id;
                if let Err(error) = self.registry.register_track(info) {
                    warn!(%error, "track name rejected");
                    finish(completion, EventStatus::Error);
                    return;
                }
                debug!(track = id, %name, "track created");
                self.push_rt(RtEvent::AddTrack { track }, state);
                self.fan_out(EventPayload::TrackAdded(id));
                finish(completion, EventStatus::HandledOk);
            }

            EventPayload::RemoveTrack { track } => {
                if !self.registry.contains(track) {
                    finish(completion, EventStatus::NotFound);
                    return;
                }
                self.routing.disconnect_track(track);
                self.push_rt(RtEvent::RemoveTrack { track }, state);
                finish(completion, EventStatus::HandledOk);
            }

            EventPayload::CreateProcessor { track, uid, name } => {
                if !self.registry.contains(track) {
                    finish(completion, EventStatus::NotFound);
                    return;
                }
                let mut processor = match self.loader.load(&uid, self.sample_rate) {
                    Ok(processor) => processor,
                    Err(error) => {
                        warn!(%error, %uid, "plugin load failed");
                        finish(completion, EventStatus::Error);
                        return;
                    }
                };
                processor.data_mut().set_name(&name);
                let info = ProcessorInfo {
                    id: processor.id(),
                    name,
                    label: processor.label().to_owned(),
                    track: Some(track),
                    is_track: false,
                    parameters: Arc::clone(processor.parameters()),
                };
                let id = info.id;
                if let Err(error) = self.registry.register_processor(info) {
                    warn!(%error, "processor name rejected");
                    finish(completion, EventStatus::Error);
                    return;
                }
                debug!(processor = id, track = track, "processor created");
                self.push_rt(RtEvent::AddProcessor { track, processor }, state);
                self.fan_out(EventPayload::ProcessorAdded {
                    track,
                    processor: id,
                });
                finish(completion, EventStatus::HandledOk);
            }

            EventPayload::RemoveProcessor { track, processor } => {
                if !self.registry.contains(processor) {
                    finish(completion, EventStatus::NotFound);
                    return;
                }
                self.push_rt(RtEvent::RemoveProcessor { track, processor }, state);
                finish(completion, EventStatus::HandledOk);
            }

            EventPayload::MoveProcessor {
                processor,
                from,
                to,
            } => {
                if !self.registry.contains(processor)
                    || !self.registry.contains(from)
                    || !self.registry.contains(to)
                {
                    finish(completion, EventStatus::NotFound);
                    return;
                }
                state.pending_moves.insert(processor, to);
                self.push_rt(
                    RtEvent::RemoveProcessor {
                        track: from,
                        processor,
                    },
                    state,
                );
                finish(completion, EventStatus::HandledOk);
            }

            EventPayload::EngineOp(op) => {
                let status = op();
                finish(completion, status);
            }

            EventPayload::AsyncWork { target, job } => {
                let task = AsyncTask {
                    target,
                    work_id: self.next_work_id.fetch_add(1, Ordering::Relaxed),
                    job,
                    completion,
                };
                let sender = self.async_tx.lock();
                match sender.as_ref() {
                    Some(tx) => {
                        if let Err(crossbeam_channel::SendError(task)) = tx.send(task) {
                            finish(task.completion, EventStatus::Aborted);
                        }
                    }
                    None => finish(task.completion, EventStatus::Aborted),
                }
            }

            EventPayload::AsyncWorkCompleted {
                target,
                work_id,
                success,
            } => {
                self.push_rt(
                    RtEvent::AsyncWorkCompletion {
                        target,
                        work_id,
                        success,
                    },
                    state,
                );
                self.fan_out(EventPayload::AsyncWorkCompleted {
                    target,
                    work_id,
                    success,
                });
                finish(completion, EventStatus::HandledOk);
            }

            // Notifications posted from outside go straight to subscribers
            payload if payload.is_notification() => {
                self.fan_out(payload);
                finish(completion, EventStatus::HandledOk);
            }

            payload => {
                debug!(?payload, "unhandled event payload discarded");
                finish(completion, EventStatus::Error);
            }
        }
    }

    fn drain_rt_output(&self, state: &mut TickState) {
        while let Some(rt) = self.rt_output.pop() {
            self.handle_rt_output(rt, state);
        }
    }

    fn handle_rt_output(&self, rt: RtEvent, state: &mut TickState) {
        match rt {
            RtEvent::ParameterChange {
                target,
                parameter,
                value,
                ..
            } => {
                let domain = self
                    .registry
                    .parameter_handle(target, parameter)
                    .map(|(store, handle)| store.value(handle))
                    .unwrap_or(0.0);
                self.fan_out(EventPayload::ParameterChangeNotification {
                    processor: target,
                    parameter,
                    normalized: value,
                    domain,
                });
            }

            RtEvent::Keyboard(kb) => {
                self.fan_out(EventPayload::KeyboardNotification(kb));
            }

            RtEvent::ProcessorReturned { processor } => {
                let id = processor.id();
                if let Some(destination) = state.pending_moves.remove(&id) {
                    self.registry.set_track_membership(id, Some(destination));
                    self.push_rt(
                        RtEvent::AddProcessor {
                            track: destination,
                            processor,
                        },
                        state,
                    );
                    self.fan_out(EventPayload::ProcessorAdded {
                        track: destination,
                        processor: id,
                    });
                } else {
                    let track = self.registry.remove(id).and_then(|info| info.track);
                    self.fan_out(EventPayload::ProcessorRemoved {
                        track: track.unwrap_or(0),
                        processor: id,
                    });
                    // Dropped here, off the audio thread
                    drop(processor);
                }
            }

            RtEvent::TrackReturned { track } => {
                let id = track.id();
                for info in self.registry.processors_on_track(id) {
                    self.registry.remove(info.id);
                }
                self.registry.remove(id);
                self.fan_out(EventPayload::TrackRemoved(id));
                drop(track);
            }

            RtEvent::BlobReturned { blob } => drop(blob),

            other => {
                debug!(event = ?other, "unmapped RT output event discarded");
            }
        }
    }

    /// Build notification events and deliver them: synchronously to the
    /// matching observer lists, queued (drop-oldest) to every poster.
    fn fan_out(&self, payload: EventPayload) {
        let event = Event::new(payload);

        match event.payload() {
            EventPayload::KeyboardNotification(_) => {
                for observer in self.keyboard_listeners.read().iter() {
                    observer.notify(&event);
                }
            }
            EventPayload::ParameterChangeNotification { .. } => {
                for observer in self.parameter_listeners.read().iter() {
                    observer.notify(&event);
                }
            }
            _ => {}
        }

        let mut posters = self.posters.lock();
        for slot in posters.iter_mut().flatten() {
            if let Some(copy) = clone_notification(event.payload()) {
                if slot.queue.len() >= POSTER_QUEUE_CAPACITY {
                    slot.queue.pop_front();
                    slot.dropped += 1;
                }
                slot.queue.push_back(Event::new(copy));
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

fn finish(completion: Option<CompletionCallback>, status: EventStatus) {
    if let Some(callback) = completion {
        callback(status);
    }
}

fn clone_notification(payload: &EventPayload) -> Option<EventPayload> {
    match payload {
        EventPayload::ParameterChangeNotification {
            processor,
            parameter,
            normalized,
            domain,
        } => Some(EventPayload::ParameterChangeNotification {
            processor: *processor,
            parameter: *parameter,
            normalized: *normalized,
            domain: *domain,
        }),
        EventPayload::KeyboardNotification(kb) => Some(EventPayload::KeyboardNotification(*kb)),
        EventPayload::TrackAdded(id) => Some(EventPayload::TrackAdded(*id)),
        EventPayload::TrackRemoved(id) => Some(EventPayload::TrackRemoved(*id)),
        EventPayload::ProcessorAdded { track, processor } => Some(EventPayload::ProcessorAdded {
            track: *track,
            processor: *processor,
        }),
        EventPayload::ProcessorRemoved { track, processor } => {
            Some(EventPayload::ProcessorRemoved {
                track: *track,
                processor: *processor,
            })
        }
        EventPayload::AsyncWorkCompleted {
            target,
            work_id,
            success,
        } => Some(EventPayload::AsyncWorkCompleted {
            target: *target,
            work_id: *work_id,
            success: *success,
        }),
        _ => None,
    }
}
