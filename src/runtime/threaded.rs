//! Parallel dispatch: one OS thread and one mailbox per actor.
//!
//! Actor state stays private to its thread; the only shared structures are
//! the routing table and the timer schedule. Time is free running: the timer
//! thread sleeps on a condvar until the next due timer or until a new timer is
//! scheduled.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, trace};

use crate::core::actor::{Actor, Context, Timer, TimerId};
use crate::core::error::SchedulerError;
use crate::core::messages::{ActorId, Message, NodeId};
use crate::infra::mailbox::{InMemoryMailbox, Mailbox, MailboxHandle};
use crate::infra::queue::EventId;
use crate::runtime::timeline::Timeline;
use crate::runtime::Participant;
use crate::util::clock::VirtualTime;
use crate::worker::monitor::{self, MonitorRequest, MonitorResponse};

type Invocation = Box<dyn FnOnce(&mut Participant, &mut dyn Context) + Send>;

/// What an actor thread receives.
enum Envelope {
    Deliver { from: ActorId, message: Message },
    Timer { id: EventId, timer: Timer },
    Invoke(Invocation),
    Monitor { request_id: u64, request: MonitorRequest },
    Stop,
}

struct TimerFire {
    owner: ActorId,
    timer: Timer,
}

/// Timer schedule plus the timers popped but not yet handled, so a cancel
/// that races with delivery still wins.
struct TimerState {
    timeline: Timeline<TimerFire>,
    in_flight: HashSet<EventId>,
}

#[cfg(feature = "tokio-runtime")]
type MonitorReply = tokio::sync::oneshot::Sender<Result<MonitorResponse, SchedulerError>>;

struct Shared {
    routes: RwLock<HashMap<ActorId, MailboxHandle<Envelope>>>,
    timers: Mutex<TimerState>,
    wake: Condvar,
    shutdown: AtomicBool,
    next_request: AtomicU64,
    #[cfg(feature = "tokio-runtime")]
    monitors: Mutex<HashMap<u64, MonitorReply>>,
}

impl Shared {
    fn route(&self, to: &ActorId, envelope: Envelope) -> Result<(), SchedulerError> {
        let routes = self.routes.read();
        let mailbox = routes
            .get(to)
            .ok_or_else(|| SchedulerError::Unreachable(to.clone()))?;
        mailbox.post(envelope)
    }

    fn take_in_flight(&self, id: EventId) -> bool {
        self.timers.lock().in_flight.remove(&id)
    }

    fn answer_monitor(&self, request_id: u64, response: Result<MonitorResponse, SchedulerError>) {
        #[cfg(feature = "tokio-runtime")]
        if let Some(reply) = self.monitors.lock().remove(&request_id) {
            let _ = reply.send(response);
        }
        #[cfg(not(feature = "tokio-runtime"))]
        let _ = (request_id, response);
    }
}

struct ThreadContext<'a> {
    owner: &'a ActorId,
    shared: &'a Shared,
}

impl Context for ThreadContext<'_> {
    fn now(&self) -> VirtualTime {
        self.shared.timers.lock().timeline.now()
    }

    fn send(&mut self, to: ActorId, message: Message) -> Result<(), SchedulerError> {
        trace!(from = %self.owner, %to, kind = message.kind(), "send");
        self.shared.route(
            &to,
            Envelope::Deliver {
                from: self.owner.clone(),
                message,
            },
        )
    }

    fn is_reachable(&self, to: &ActorId) -> bool {
        self.shared.routes.read().contains_key(to)
    }

    fn schedule(&mut self, after: Duration, timer: Timer) -> TimerId {
        let id = self.shared.timers.lock().timeline.schedule_after(
            after,
            TimerFire {
                owner: self.owner.clone(),
                timer,
            },
        );
        self.shared.wake.notify_one();
        TimerId(id)
    }

    fn cancel(&mut self, timer: TimerId) -> bool {
        let mut state = self.shared.timers.lock();
        state.timeline.cancel(timer.0) || state.in_flight.remove(&timer.0)
    }
}

fn actor_loop(
    mut actor: Participant,
    mailbox: InMemoryMailbox<Envelope>,
    shared: Arc<Shared>,
) -> Participant {
    let id = actor.id();
    let mut ctx = ThreadContext {
        owner: &id,
        shared: &shared,
    };
    actor.on_start(&mut ctx);
    while let Some(envelope) = mailbox.recv() {
        match envelope {
            Envelope::Deliver { from, message } => actor.on_message(&mut ctx, from, message),
            Envelope::Timer { id: event, timer } => {
                if shared.take_in_flight(event) {
                    actor.on_timer(&mut ctx, timer);
                }
            }
            Envelope::Invoke(f) => f(&mut actor, &mut ctx),
            Envelope::Monitor {
                request_id,
                request,
            } => {
                let response = actor
                    .as_worker()
                    .map(|w| monitor::answer(w, request, ctx.now()))
                    .ok_or_else(|| SchedulerError::UnknownActor(id.to_string()));
                shared.answer_monitor(request_id, response);
            }
            Envelope::Stop => break,
        }
    }
    actor.on_stop(&mut ctx);
    debug!(actor = %id, "actor thread exiting");
    actor
}

fn timer_loop(shared: Arc<Shared>) {
    let mut state = shared.timers.lock();
    while !shared.shutdown.load(Ordering::Acquire) {
        let now = state.timeline.now();
        while let Some((event, fire)) = state.timeline.pop_due(now) {
            state.in_flight.insert(event);
            let envelope = Envelope::Timer {
                id: event,
                timer: fire.timer,
            };
            if shared.route(&fire.owner, envelope).is_err() {
                state.in_flight.remove(&event);
                trace!(owner = %fire.owner, "timer for departed actor dropped");
            }
        }
        match state.timeline.next_due() {
            Some(due) => {
                let wait = due - state.timeline.now();
                shared.wake.wait_for(&mut state, wait);
            }
            None => shared.wake.wait(&mut state),
        }
    }
}

/// Threaded actor host with a free-running clock.
pub struct ThreadedRuntime {
    shared: Arc<Shared>,
    threads: Vec<(ActorId, JoinHandle<Participant>)>,
    timer_thread: Option<JoinHandle<()>>,
}

impl ThreadedRuntime {
    /// Start the timer thread. The clock runs from zero in real time.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] if the timer thread cannot be spawned.
    pub fn new() -> Result<Self, SchedulerError> {
        let mut timeline = Timeline::new();
        timeline.resume();
        let shared = Arc::new(Shared {
            routes: RwLock::new(HashMap::new()),
            timers: Mutex::new(TimerState {
                timeline,
                in_flight: HashSet::new(),
            }),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_request: AtomicU64::new(1),
            #[cfg(feature = "tokio-runtime")]
            monitors: Mutex::new(HashMap::new()),
        });
        let timer_shared = Arc::clone(&shared);
        let timer_thread = thread::Builder::new()
            .name("broker-timers".into())
            .spawn(move || timer_loop(timer_shared))
            .map_err(|e| SchedulerError::Config(format!("failed to spawn timer thread: {e}")))?;
        Ok(Self {
            shared,
            threads: Vec::new(),
            timer_thread: Some(timer_thread),
        })
    }

    /// Current time on the shared clock.
    pub fn now(&self) -> VirtualTime {
        self.shared.timers.lock().timeline.now()
    }

    /// Spawn `participant` on its own thread and run its `on_start` there.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] for a duplicate id or a failed spawn.
    pub fn spawn(&mut self, participant: Participant) -> Result<ActorId, SchedulerError> {
        let id = participant.id();
        let mailbox = InMemoryMailbox::new();
        {
            let mut routes = self.shared.routes.write();
            if routes.contains_key(&id) {
                return Err(SchedulerError::Config(format!("actor {id} already exists")));
            }
            routes.insert(id.clone(), mailbox.handle());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("actor-{id}"))
            .spawn(move || actor_loop(participant, mailbox, shared))
            .map_err(|e| {
                self.shared.routes.write().remove(&id);
                SchedulerError::Config(format!("failed to spawn actor {id}: {e}"))
            })?;
        info!(actor = %id, "actor spawned");
        self.threads.push((id.clone(), handle));
        Ok(id)
    }

    /// Run `f` on the actor's own thread, between two of its handlers.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Unreachable`] for an unknown actor and
    /// [`SchedulerError::Shutdown`] if it stops before answering.
    pub fn invoke<R, F>(&self, id: &ActorId, f: F) -> Result<R, SchedulerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Participant, &mut dyn Context) -> R + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.shared.route(
            id,
            Envelope::Invoke(Box::new(move |actor, ctx| {
                let _ = tx.send(f(actor, ctx));
            })),
        )?;
        rx.recv().map_err(|_| SchedulerError::Shutdown)
    }

    /// Monitoring request against a worker, answered asynchronously by the
    /// worker's thread. Requests are correlated by id.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Unreachable`] for an unknown worker,
    /// [`SchedulerError::UnknownActor`] if the actor is not a worker, and
    /// [`SchedulerError::Shutdown`] if it stops before answering.
    #[cfg(feature = "tokio-runtime")]
    pub async fn monitor(
        &self,
        node: &NodeId,
        request: MonitorRequest,
    ) -> Result<MonitorResponse, SchedulerError> {
        let request_id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.shared.monitors.lock().insert(request_id, tx);
        let posted = self.shared.route(
            &ActorId::Worker(node.clone()),
            Envelope::Monitor {
                request_id,
                request,
            },
        );
        if let Err(e) = posted {
            self.shared.monitors.lock().remove(&request_id);
            return Err(e);
        }
        rx.await.map_err(|_| SchedulerError::Shutdown)?
    }

    /// Blocking monitoring request against a worker.
    ///
    /// # Errors
    ///
    /// As [`ThreadedRuntime::invoke`], plus [`SchedulerError::UnknownActor`]
    /// if the actor is not a worker.
    pub fn monitor_blocking(
        &self,
        node: &NodeId,
        request: MonitorRequest,
    ) -> Result<MonitorResponse, SchedulerError> {
        let id = ActorId::Worker(node.clone());
        let name = id.to_string();
        self.invoke(&id, move |actor, ctx| {
            actor.as_worker().map(|w| monitor::answer(w, request, ctx.now()))
        })?
        .ok_or(SchedulerError::UnknownActor(name))
    }

    /// Tear down one actor and return it.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownActor`] if `id` is not hosted here and
    /// [`SchedulerError::Shutdown`] if its thread panicked.
    pub fn stop(&mut self, id: &ActorId) -> Result<Participant, SchedulerError> {
        let pos = self
            .threads
            .iter()
            .position(|(t, _)| t == id)
            .ok_or_else(|| SchedulerError::UnknownActor(id.to_string()))?;
        let (id, handle) = self.threads.remove(pos);
        self.join(&id, handle)
    }

    fn join(
        &self,
        id: &ActorId,
        handle: JoinHandle<Participant>,
    ) -> Result<Participant, SchedulerError> {
        let mailbox = self.shared.routes.write().remove(id);
        if let Some(mailbox) = mailbox {
            let _ = mailbox.post(Envelope::Stop);
        }
        handle.join().map_err(|_| {
            error!(actor = %id, "actor thread panicked");
            SchedulerError::Shutdown
        })
    }

    fn shutdown_inner(&mut self) -> Vec<Participant> {
        let mut stopped = Vec::new();
        while let Some((id, handle)) = self.threads.pop() {
            if let Ok(p) = self.join(&id, handle) {
                stopped.push(p);
            }
        }
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _state = self.shared.timers.lock();
            self.shared.wake.notify_all();
        }
        if let Some(t) = self.timer_thread.take() {
            let _ = t.join();
        }
        stopped
    }

    /// Stop every actor in reverse spawn order and the timer thread. Returns
    /// the actors for inspection.
    pub fn shutdown(mut self) -> Vec<Participant> {
        let stopped = self.shutdown_inner();
        info!(actors = stopped.len(), "threaded runtime shut down");
        stopped
    }
}

impl Drop for ThreadedRuntime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
