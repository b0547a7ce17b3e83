use std::sync::{Arc, RwLock};

use futures::{Stream, StreamExt, future::BoxFuture};
use tokio::{runtime::Runtime, sync::broadcast};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    NodeflowError, Result, ShareLock,
    common::{BroadcastQueue, Shutdown},
    events::{Event, GraphEvent, Log, Message, NodeEvent},
    store::data::NodeResult,
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        if let Ok(handlers) = $handles.read() {
            for handle in handlers.iter() {
                (handle)($(&$item),+);
            }
        }
    };
}

macro_rules! dispatch_event_async {
    ($handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        tokio::spawn(async move {
            let handlers = match handles.read() {
                Ok(handlers) => handlers.clone(),
                Err(_) => return,
            };
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 2048;
const LOG_QUEUE_SIZE: usize = 4096;

pub type WorkflowEventHandle = Arc<dyn Fn(&Event<Message>) + Send + Sync>;
pub type WorkflowLogHandle = Arc<dyn Fn(&Event<Log>) + Send + Sync>;
pub type WorkflowEventHandleAsync = Arc<dyn Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type WorkflowLogHandleAsync = Arc<dyn Fn(&Event<Log>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// use the glob pattern to match the execution id
    /// eg. exec1*
    pub eid: String,

    /// use the glob pattern to match the node id
    /// eg. fetch_*
    pub nid: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            eid: "*".to_string(),
            nid: "*".to_string(),
        }
    }
}

impl ChannelOptions {
    pub fn new(
        eid: &str,
        nid: &str,
    ) -> Self {
        Self {
            eid: eid.to_string(),
            nid: nid.to_string(),
        }
    }

    pub fn with_eid(eid: &str) -> Self {
        Self::new(eid, "*")
    }

    pub fn with_nid(nid: &str) -> Self {
        Self::new("*", nid)
    }
}

#[derive(Clone)]
pub struct Channel {
    event_queue: Arc<BroadcastQueue<Event<Message>>>,
    log_queue: Arc<BroadcastQueue<Event<Log>>>,

    events: ShareLock<Vec<WorkflowEventHandle>>,
    logs: ShareLock<Vec<WorkflowLogHandle>>,
    events_async: ShareLock<Vec<WorkflowEventHandleAsync>>,
    logs_async: ShareLock<Vec<WorkflowLogHandleAsync>>,

    shutdown: Arc<Shutdown>,
}

impl Channel {
    pub(crate) fn new() -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            log_queue: BroadcastQueue::new(LOG_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            logs: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            logs_async: Arc::new(RwLock::new(Vec::new())),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub(crate) fn emit(
        &self,
        message: Message,
    ) {
        self.event_queue.send(Event::new(&message));
    }

    pub(crate) fn emit_log(
        &self,
        log: Log,
    ) {
        self.log_queue.send(Event::new(&log));
    }

    pub(crate) fn subscribe_logs(&self) -> broadcast::Receiver<Event<Log>> {
        self.log_queue.subscribe()
    }

    pub(crate) fn listen(
        &self,
        runtime: &Runtime,
    ) {
        let mut event_queue = self.event_queue.subscribe();
        let mut log_queue = self.log_queue.subscribe();
        let events = self.events.clone();
        let logs = self.logs.clone();
        let events_async = self.events_async.clone();
        let logs_async = self.logs_async.clone();

        let shutdown = self.shutdown.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(events_async, &e);
                    }
                    Ok(log) = log_queue.recv() => {
                        let l = log.clone();
                        dispatch_event!(logs, &l);
                        dispatch_event_async!(logs_async, &log);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

type Globs = (globset::GlobMatcher, globset::GlobMatcher);

#[derive(Clone)]
pub struct ChannelEvent {
    channel: Arc<Channel>,

    glob: Globs,
}

impl ChannelEvent {
    pub fn channel(
        channel: Arc<Channel>,
        options: ChannelOptions,
    ) -> Result<Self> {
        let compile = |pattern: &str| {
            globset::Glob::new(pattern).map(|g| g.compile_matcher()).map_err(|e| NodeflowError::Config(format!("invalid channel pattern '{}': {}", pattern, e)))
        };
        Ok(Self {
            channel,
            glob: (compile(&options.eid)?, compile(&options.nid)?),
        })
    }

    fn push_event(
        &self,
        handle: WorkflowEventHandle,
    ) {
        if let Ok(mut events) = self.channel.events.write() {
            events.push(handle);
        }
    }

    /// Called with the execution id when an execution completes (fully or partially).
    pub fn on_complete(
        &self,
        f: impl Fn(String) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push_event(Arc::new(move |e| {
            if e.event.is_complete() && is_match(&glob, e) {
                f(e.eid.clone());
            }
        }));
    }

    pub fn on_error(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push_event(Arc::new(move |e| {
            if e.event.is_error() && is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push_event(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e);
            }
        }));
    }

    /// Called with the execution id and the entry for every appended node result.
    pub fn on_result(
        &self,
        f: impl Fn(&str, &NodeResult) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push_event(Arc::new(move |e| {
            if let GraphEvent::Node(NodeEvent::Result(result)) = &e.event {
                if is_match(&glob, e) {
                    f(&e.eid, result);
                }
            }
        }));
    }

    pub fn on_log(
        &self,
        f: impl Fn(&Event<Log>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        if let Ok(mut logs) = self.channel.logs.write() {
            logs.push(Arc::new(move |e| {
                if is_match_log(&glob, e) {
                    f(e);
                }
            }));
        }
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        if let Ok(mut events) = self.channel.events_async.write() {
            events.push(Arc::new(move |e| {
                if is_match(&glob, e) {
                    f(e)
                } else {
                    Box::pin(async {})
                }
            }));
        }
    }

    pub fn on_log_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Log>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        if let Ok(mut logs) = self.channel.logs_async.write() {
            logs.push(Arc::new(move |e| {
                if is_match_log(&glob, e) {
                    f(e)
                } else {
                    Box::pin(async {})
                }
            }));
        }
    }

    /// Matching events as a stream. Events emitted before the call are not replayed,
    /// and a subscriber that falls too far behind skips the events it missed.
    pub fn stream(&self) -> impl Stream<Item = Event<Message>> + Send + 'static {
        let glob = self.glob.clone();
        BroadcastStream::new(self.channel.event_queue.subscribe()).filter_map(move |item| {
            let out = match item {
                Ok(e) if is_match(&glob, &e) => Some(e),
                _ => None,
            };
            futures::future::ready(out)
        })
    }
}

fn is_match(
    glob: &Globs,
    e: &Event<Message>,
) -> bool {
    let (pat_eid, pat_nid) = glob;
    pat_eid.is_match(&e.eid) && pat_nid.is_match(&e.nid)
}

fn is_match_log(
    glob: &Globs,
    e: &Event<Log>,
) -> bool {
    let (pat_eid, pat_nid) = glob;
    pat_eid.is_match(&e.eid) && pat_nid.is_match(&e.nid)
}
