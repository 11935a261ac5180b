use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, error, info, warn};

use crate::addr::Dpid;
use crate::barrier::{await_barrier, BarrierCallback, BarrierTiming, FailureRecorder};
use crate::command_queue::{lock, CommandQueue, Reply, SwitchQueues};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::flow_entry::{ActionParser, FlowTableEntry, Operation, StaticActionParser};
use crate::ofp_header::OfpHeader;
use crate::ofp_message::OfpMessage;
use crate::openflow0x04::message::Message;
use crate::openflow0x04::{MsgCode, StatType, StatsReq, StatsResp};
use crate::switch_listener::{LinkDiscoveryListener, LinkUpdate, ListenerSet, SwitchEvent, SwitchListener,
                             SwitchRegistry};

/// OpenFlow Controller
///
/// Version-agnostic API for implementing an OpenFlow controller.
pub trait OfpController {
    /// OpenFlow message type supporting the same protocol version as the controller.
    type Message: OfpMessage;

    /// Send a message with transaction id `xid` to the switch `dpid`.
    fn send_message(&self, dpid: u64, xid: u32, msg: &Self::Message) -> Result<()>;
    /// Perform handshake and begin loop reading incoming messages from client stream.
    fn handle_client_connected(&self, stream: TcpStream) -> Result<()>;
}

/// Byte sink towards one switch.
pub type SwitchWriter = Box<dyn Write + Send>;

type Connection = Arc<Mutex<SwitchWriter>>;

/// One registered connection of a switch, as returned by
/// `Controller::switch_connected`.
#[derive(Clone)]
pub struct Session {
    dpid: u64,
    conn: Connection,
}

impl Session {
    pub fn dpid(&self) -> u64 {
        self.dpid
    }
}

#[derive(Default)]
struct StatsState {
    segments: Vec<StatsResp>,
    done: bool,
    closed: bool,
}

#[derive(Default)]
struct StatsSlot {
    state: Mutex<StatsState>,
    ready: Condvar,
}

impl StatsSlot {
    fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_all();
    }
}

type PendingStats = Arc<Mutex<HashMap<(u64, u32), Arc<StatsSlot>>>>;

/// A statistics request in flight.
pub struct StatsFuture {
    key: (u64, u32),
    slot: Arc<StatsSlot>,
    pending: PendingStats,
}

impl StatsFuture {
    pub fn xid(&self) -> u32 {
        self.key.1
    }

    /// Every reply segment, once the last one arrived. `None` on timeout, or
    /// when the switch failed the request or went away.
    pub fn wait(self, timeout: Duration) -> Option<Vec<StatsResp>> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.slot.state);
        loop {
            if state.done {
                return Some(std::mem::take(&mut state.segments));
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.slot
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for StatsFuture {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.key);
    }
}

/// The controller core: live switch connections, their command queues and
/// the listener registries.
pub struct Controller {
    config: ControllerConfig,
    timing: BarrierTiming,
    connections: RwLock<HashMap<u64, Connection>>,
    queues: SwitchQueues,
    switches: SwitchRegistry,
    link_listeners: ListenerSet<dyn LinkDiscoveryListener>,
    action_parser: Box<dyn ActionParser>,
    pending_stats: PendingStats,
    streams: Mutex<HashMap<SocketAddr, TcpStream>>,
    shutting_down: AtomicBool,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Controller> {
        Self::with_action_parser(config, Box::new(StaticActionParser))
    }

    pub fn with_action_parser(config: ControllerConfig, action_parser: Box<dyn ActionParser>) -> Result<Controller> {
        config.validate()?;
        Ok(Controller {
            timing: config.barrier_timing(),
            queues: SwitchQueues::new(config.reply_queue_capacity),
            config,
            connections: RwLock::new(HashMap::new()),
            switches: SwitchRegistry::new(),
            link_listeners: ListenerSet::new(),
            action_parser,
            pending_stats: Arc::new(Mutex::new(HashMap::new())),
            streams: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn connection(&self, dpid: u64) -> Option<Connection> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&dpid)
            .cloned()
    }

    pub fn is_connected(&self, dpid: u64) -> bool {
        self.connection(dpid).is_some()
    }

    pub fn connected_switches(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Register the transport for `dpid` and tell the switch listeners.
    ///
    /// A second connection for the same id replaces the first; the returned
    /// `Session` tells them apart when either one ends.
    pub fn switch_connected(&self, dpid: u64, writer: SwitchWriter) -> Result<Session> {
        let conn: Connection = Arc::new(Mutex::new(writer));
        let previous = {
            let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(Error::ShutDown);
            }
            connections.insert(dpid, conn.clone())
        };
        if previous.is_some() {
            warn!("switch {} reconnected, replacing its old connection", Dpid(dpid));
        }
        info!("switch {} connected", Dpid(dpid));
        self.switches.dispatch(dpid, SwitchEvent::Added);
        Ok(Session { dpid, conn })
    }

    /// Forget `dpid`: its connection, command queue and pending statistics.
    pub fn switch_disconnected(&self, dpid: u64) {
        self.end_session(dpid, None);
    }

    /// Like `switch_disconnected`, but only if `session` is still the live
    /// connection of its switch. Returns whether the switch was forgotten.
    pub fn session_ended(&self, session: &Session) -> bool {
        self.end_session(session.dpid, Some(&session.conn))
    }

    fn end_session(&self, dpid: u64, ended: Option<&Connection>) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        match (connections.get(&dpid), ended) {
            (None, _) => {
                debug!("switch {} was not connected", Dpid(dpid));
                return false;
            }
            (Some(live), Some(ended)) if !Arc::ptr_eq(live, ended) => {
                info!("switch {}: old connection closed, a newer one stays up", Dpid(dpid));
                return false;
            }
            _ => (),
        }
        connections.remove(&dpid);
        self.queues.remove(dpid);
        drop(connections);
        self.forget(dpid);
        true
    }

    /// Abandon the statistics requests of a switch that is already
    /// unregistered, then tell the listeners.
    fn forget(&self, dpid: u64) {
        let mut pending = lock(&self.pending_stats);
        pending.retain(|&(id, _), slot| {
            if id == dpid {
                slot.close();
            }
            id != dpid
        });
        drop(pending);
        info!("switch {} disconnected", Dpid(dpid));
        self.switches.dispatch(dpid, SwitchEvent::Removed);
    }

    /// Stop all controller work: drop every switch, abandon pending
    /// statistics and close the sockets accepted by
    /// `handle_client_connected`. Barriers in progress end as timed out at
    /// their next poll. New sessions are refused afterwards.
    pub fn shutdown_all_now(&self) {
        let dropped: Vec<u64> = {
            let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            self.shutting_down.store(true, Ordering::SeqCst);
            let ids: Vec<u64> = connections.drain().map(|(dpid, _)| dpid).collect();
            for &dpid in &ids {
                self.queues.remove(dpid);
            }
            ids
        };
        for dpid in dropped {
            self.forget(dpid);
        }
        for (_, slot) in lock(&self.pending_stats).drain() {
            slot.close();
        }
        for (peer, stream) in lock(&self.streams).drain() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("closing {}: {}", peer, e);
            }
        }
        info!("controller shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The command queue of a connected switch. It is created under the
    /// connection lock, so a concurrent disconnect cannot leave it behind.
    fn live_queue(&self, dpid: u64) -> Result<Arc<CommandQueue>> {
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        if !connections.contains_key(&dpid) {
            return Err(Error::SwitchNotFound(dpid));
        }
        Ok(self.queues.queue(dpid))
    }

    /// Send `msg` with a fresh xid, which is returned.
    pub fn send(&self, dpid: u64, msg: &Message) -> Result<u32> {
        let xid = self.live_queue(dpid)?.next_xid();
        self.send_message(dpid, xid, msg)?;
        Ok(xid)
    }

    fn push_entry(&self, entry: &FlowTableEntry, dpid: u64, expected: Operation) -> Result<u32> {
        if entry.operation != expected {
            return Err(Error::invalid(format!("{:?} entry passed where {:?} was expected",
                                              entry.operation,
                                              expected)));
        }
        let fm = entry.build_flow_mod(self.action_parser.as_ref())?;
        let xid = self.send(dpid, &Message::FlowMod(fm))?;
        debug!("switch {}: {:?} entry {} sent as xid {}",
               Dpid(dpid),
               entry.operation,
               entry.name.as_deref().unwrap_or("<unnamed>"),
               xid);
        Ok(xid)
    }

    /// Install `entry` on `dpid`; returns the FLOW_MOD's xid.
    pub fn add_entry(&self, entry: &FlowTableEntry, dpid: u64) -> Result<u32> {
        self.push_entry(entry, dpid, Operation::Insert)
    }

    /// Strictly delete `entry` from `dpid`; returns the FLOW_MOD's xid.
    pub fn remove_entry(&self, entry: &FlowTableEntry, dpid: u64) -> Result<u32> {
        self.push_entry(entry, dpid, Operation::Remove)
    }

    /// Send a barrier and wait for it. `Ok(true)` once the switch has
    /// processed everything sent before it, `Ok(false)` on timeout.
    /// Failed commands are reported through `callback` either way.
    pub fn barrier(&self, dpid: u64, callback: Option<&dyn BarrierCallback>) -> Result<bool> {
        let queue = self.live_queue(dpid)?;
        let _guard = queue.barrier_guard();
        let xid = queue.next_xid();
        self.send_message(dpid, xid, &Message::BarrierRequest)?;
        Ok(await_barrier(&queue, dpid, xid, self.timing, || self.is_connected(dpid), callback))
    }

    /// True only if the barrier committed and no command before it failed.
    pub fn send_barrier(&self, dpid: u64) -> bool {
        let recorder = FailureRecorder::new();
        match self.barrier(dpid, Some(&recorder)) {
            Ok(committed) => committed && !recorder.had_failure(),
            Err(e) => {
                warn!("barrier on switch {} failed: {}", Dpid(dpid), e);
                false
            }
        }
    }

    /// Ask `dpid` for every entry of `stat_type`. `Ok(None)` for an unknown switch.
    pub fn get_stats(&self, dpid: u64, stat_type: StatType) -> Result<Option<StatsFuture>> {
        let req = StatsReq::all(stat_type)?;
        let xid = match self.live_queue(dpid) {
            Ok(queue) => queue.next_xid(),
            Err(_) => return Ok(None),
        };
        let slot = Arc::new(StatsSlot::default());
        lock(&self.pending_stats).insert((dpid, xid), slot.clone());
        let future = StatsFuture {
            key: (dpid, xid),
            slot,
            pending: self.pending_stats.clone(),
        };
        self.send_message(dpid, xid, &Message::MultipartRequest(req))?;
        Ok(Some(future))
    }

    fn stats_reply(&self, dpid: u64, xid: u32, resp: StatsResp) {
        let mut pending = lock(&self.pending_stats);
        let slot = match pending.get(&(dpid, xid)) {
            Some(slot) => slot.clone(),
            None => {
                debug!("switch {}: unsolicited multipart reply {}", Dpid(dpid), xid);
                return;
            }
        };
        let last = !resp.more();
        if last {
            pending.remove(&(dpid, xid));
        }
        drop(pending);
        let mut state = lock(&slot.state);
        state.segments.push(resp);
        state.done = last;
        slot.ready.notify_all();
    }

    /// Decode and dispatch one framed message received from `dpid`.
    pub fn on_message(&self, dpid: u64, bytes: &[u8]) -> Result<()> {
        let (xid, msg) = Message::decode(bytes)?;
        match msg {
            Message::Error(_) => {
                if let Some(slot) = lock(&self.pending_stats).remove(&(dpid, xid)) {
                    slot.close();
                }
                self.live_queue(dpid)?.enqueue(Reply { xid, message: msg })
            }
            Message::BarrierReply => self.live_queue(dpid)?.enqueue(Reply { xid, message: msg }),
            Message::EchoRequest(payload) => self.send_message(dpid, xid, &Message::EchoReply(payload)),
            Message::MultipartReply(resp) => {
                self.stats_reply(dpid, xid, resp);
                Ok(())
            }
            Message::Unhandled(t, ref body) if t == MsgCode::PortStatus as u8 => {
                // reason, 7 pad bytes, then the port description led by its number
                let port = if body.len() >= 12 { BigEndian::read_u32(&body[8..12]) } else { 0 };
                self.switches.dispatch(dpid, SwitchEvent::PortChanged { port });
                Ok(())
            }
            Message::FlowRemoved(ref fr) => {
                info!("switch {}: flow removed ({:?}, priority {}, cookie {:#x})",
                      Dpid(dpid),
                      fr.reason,
                      fr.priority,
                      fr.cookie);
                Ok(())
            }
            other => {
                debug!("switch {}: ignoring {:?} (xid {})", Dpid(dpid), other.msg_code(), xid);
                Ok(())
            }
        }
    }

    /// Handshake and read loop over any byte stream; `writer` is the same
    /// connection's sending half. Returns when the stream ends.
    pub fn serve<R: Read>(&self, mut reader: R, mut writer: SwitchWriter) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        write_frame(&mut writer, 0, &Message::Hello(vec![]))?;
        write_frame(&mut writer, 0, &Message::FeaturesReq)?;

        let dpid = loop {
            let frame = match read_frame(&mut reader)? {
                Some(frame) => frame,
                None => {
                    info!("connection closed before the features reply");
                    return Ok(());
                }
            };
            match Message::decode(&frame) {
                Ok((_, Message::FeaturesReply(features))) => break features.datapath_id,
                Ok((xid, Message::EchoRequest(payload))) => {
                    write_frame(&mut writer, xid, &Message::EchoReply(payload))?
                }
                Ok((_, msg)) => debug!("handshake: ignoring {:?}", msg.msg_code()),
                Err(e) => warn!("handshake: dropping malformed frame: {}", e),
            }
        };

        let session = self.switch_connected(dpid, writer)?;
        let outcome = loop {
            match read_frame(&mut reader) {
                Ok(Some(frame)) => {
                    if let Err(e) = self.on_message(dpid, &frame) {
                        warn!("switch {}: {}", Dpid(dpid), e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(Error::Io(e)),
            }
        };
        self.session_ended(&session);
        outcome
    }

    pub fn register_switch_listener(&self, listener: Arc<dyn SwitchListener>) -> bool {
        self.switches.subscribe(listener)
    }

    pub fn unregister_switch_listener(&self, listener: &Arc<dyn SwitchListener>) -> bool {
        self.switches.unsubscribe(listener)
    }

    pub fn register_link_discovery_listener(&self, listener: Arc<dyn LinkDiscoveryListener>) -> bool {
        self.link_listeners.subscribe(listener)
    }

    pub fn unregister_link_discovery_listener(&self, listener: &Arc<dyn LinkDiscoveryListener>) -> bool {
        self.link_listeners.unsubscribe(listener)
    }

    pub fn notify_link_updates(&self, updates: &[LinkUpdate]) {
        self.link_listeners.for_each(|l| l.links_updated(updates));
    }
}

impl OfpController for Controller {
    type Message = Message;

    fn send_message(&self, dpid: u64, xid: u32, msg: &Message) -> Result<()> {
        let bytes = Message::encode(xid, msg)?;
        let conn = self.connection(dpid).ok_or(Error::SwitchNotFound(dpid))?;
        let mut writer = lock(&conn);
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn handle_client_connected(&self, stream: TcpStream) -> Result<()> {
        let peer = stream.peer_addr()?;
        info!("accepted connection from {}", peer);
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        {
            let mut streams = lock(&self.streams);
            if self.is_shut_down() {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(Error::ShutDown);
            }
            streams.insert(peer, stream.try_clone()?);
        }
        let outcome = self.serve(stream, Box::new(writer));
        lock(&self.streams).remove(&peer);
        outcome
    }
}

fn write_frame<W: Write + ?Sized>(writer: &mut W, xid: u32, msg: &Message) -> Result<()> {
    writer.write_all(&Message::encode(xid, msg)?)?;
    writer.flush()?;
    Ok(())
}

/// Read one whole message. `None` on a clean end of stream between messages.
fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut frame = vec![0; OfpHeader::size()];
    let mut filled = 0;
    while filled < frame.len() {
        match reader.read(&mut frame[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e),
        }
    }
    let length = BigEndian::read_u16(&frame[2..4]) as usize;
    if length < OfpHeader::size() {
        error!("frame length {} below header size, cannot resynchronize", length);
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad frame length"));
    }
    frame.resize(length, 0);
    reader.read_exact(&mut frame[OfpHeader::size()..])?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::thread;

    use crate::openflow0x04::{Capabilities, ErrorMsg, SwitchFeatures};

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            lock(&self.0).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink {
        fn messages(&self) -> Vec<(u32, Message)> {
            let bytes = lock(&self.0).clone();
            let mut cursor = Cursor::new(&bytes[..]);
            let mut out = vec![];
            while let Some(frame) = read_frame(&mut cursor).unwrap() {
                out.push(Message::decode(&frame).unwrap());
            }
            out
        }
    }

    /// Inbound half of a switch connection fed frame by frame; ends when
    /// the sender is dropped.
    struct Feed {
        frames: Receiver<Vec<u8>>,
        buf: Vec<u8>,
        pos: usize,
    }

    fn feed() -> (Sender<Vec<u8>>, Feed) {
        let (tx, rx) = channel();
        (tx, Feed { frames: rx, buf: vec![], pos: 0 })
    }

    impl Read for Feed {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.buf.len() {
                match self.frames.recv() {
                    Ok(frame) => {
                        self.buf = frame;
                        self.pos = 0;
                    }
                    Err(_) => return Ok(0),
                }
            }
            let n = out.len().min(self.buf.len() - self.pos);
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[derive(Default)]
    struct Lifecycle(Mutex<Vec<(bool, u64)>>);

    impl SwitchListener for Lifecycle {
        fn switch_added(&self, dpid: u64) {
            lock(&self.0).push((true, dpid));
        }

        fn switch_removed(&self, dpid: u64) {
            lock(&self.0).push((false, dpid));
        }
    }

    impl Lifecycle {
        fn events(&self) -> Vec<(bool, u64)> {
            lock(&self.0).clone()
        }
    }

    #[derive(Default)]
    struct Links(Mutex<Vec<LinkUpdate>>);

    impl LinkDiscoveryListener for Links {
        fn links_updated(&self, updates: &[LinkUpdate]) {
            lock(&self.0).extend_from_slice(updates);
        }
    }

    fn eventually<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn controller() -> Controller {
        let config = ControllerConfig {
            barrier_timeout_ms: 100,
            barrier_poll_interval_ms: 10,
            ..Default::default()
        };
        Controller::new(config).unwrap()
    }

    fn features(dpid: u64) -> Message {
        Message::FeaturesReply(SwitchFeatures {
            datapath_id: dpid,
            num_buffers: 0,
            num_tables: 1,
            auxiliary_id: 0,
            supported_capabilities: Capabilities::default(),
        })
    }

    #[test]
    fn test_unknown_switch() {
        let c = controller();
        assert!(matches!(c.add_entry(&FlowTableEntry::insert(), 1), Err(Error::SwitchNotFound(1))));
        assert!(matches!(c.barrier(1, None), Err(Error::SwitchNotFound(1))));
        assert!(!c.send_barrier(1));
        assert!(c.get_stats(1, StatType::Flow).unwrap().is_none());
    }

    #[test]
    fn test_entries_get_increasing_xids() {
        let c = controller();
        let sink = Sink::default();
        c.switch_connected(5, Box::new(sink.clone())).unwrap();
        assert_eq!(c.add_entry(&FlowTableEntry::insert(), 5).unwrap(), 1);
        assert_eq!(c.remove_entry(&FlowTableEntry::remove(), 5).unwrap(), 2);
        let sent = sink.messages();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[1], (2, Message::FlowMod(_))));
    }

    #[test]
    fn test_wrong_operation_is_invalid() {
        let c = controller();
        c.switch_connected(5, Box::new(Sink::default())).unwrap();
        assert!(matches!(c.add_entry(&FlowTableEntry::remove(), 5), Err(Error::InvalidArgument(_))));
        let mut bad = FlowTableEntry::insert();
        bad.actions = Some("explode".to_string());
        assert!(matches!(c.add_entry(&bad, 5), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_echo_is_answered() {
        let c = controller();
        let sink = Sink::default();
        c.switch_connected(5, Box::new(sink.clone())).unwrap();
        let req = Message::encode(77, &Message::EchoRequest(vec![1, 2, 3])).unwrap();
        c.on_message(5, &req).unwrap();
        assert_eq!(sink.messages(), vec![(77, Message::EchoReply(vec![1, 2, 3]))]);
    }

    #[test]
    fn test_barrier_times_out_without_reply() {
        let c = controller();
        c.switch_connected(5, Box::new(Sink::default())).unwrap();
        assert_eq!(c.barrier(5, None).unwrap(), false);
    }

    #[test]
    fn test_queued_error_is_reported() {
        let c = controller();
        c.switch_connected(5, Box::new(Sink::default())).unwrap();
        let err = Message::Error(ErrorMsg { err_type: 5, code: 0, data: vec![] });
        c.on_message(5, &Message::encode(1, &err).unwrap()).unwrap();
        let rec = FailureRecorder::new();
        assert_eq!(c.barrier(5, Some(&rec)).unwrap(), false);
        assert_eq!(rec.failed_xids(), vec![1]);
    }

    #[test]
    fn test_stats_segments_are_collected() {
        let c = controller();
        let sink = Sink::default();
        c.switch_connected(5, Box::new(sink.clone())).unwrap();
        let future = c.get_stats(5, StatType::Port).unwrap().unwrap();
        let xid = future.xid();
        for (flags, byte) in &[(1u16, 0xaau8), (0, 0xbb)] {
            let resp = StatsResp { stat_type: StatType::Port, flags: *flags, body: vec![*byte; 4] };
            c.on_message(5, &Message::encode(xid, &Message::MultipartReply(resp)).unwrap()).unwrap();
        }
        let segments = future.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].body, vec![0xbb; 4]);
        assert!(lock(&c.pending_stats).is_empty());
    }

    #[test]
    fn test_stats_abandoned_on_disconnect() {
        let c = controller();
        c.switch_connected(5, Box::new(Sink::default())).unwrap();
        let future = c.get_stats(5, StatType::Desc).unwrap().unwrap();
        c.switch_disconnected(5);
        assert!(future.wait(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_serve_handshake_and_loop() {
        let c = controller();
        let mut inbound = vec![];
        inbound.extend(Message::encode(0, &Message::Hello(vec![])).unwrap());
        inbound.extend(Message::encode(3, &Message::EchoRequest(vec![9])).unwrap());
        inbound.extend(Message::encode(0, &features(0xab)).unwrap());
        inbound.extend(Message::encode(4, &Message::EchoRequest(vec![8])).unwrap());
        let sink = Sink::default();
        c.serve(Cursor::new(inbound), Box::new(sink.clone())).unwrap();

        let sent = sink.messages();
        assert_eq!(sent[0], (0, Message::Hello(vec![])));
        assert_eq!(sent[1], (0, Message::FeaturesReq));
        assert_eq!(sent[2], (3, Message::EchoReply(vec![9])));
        assert_eq!(sent[3], (4, Message::EchoReply(vec![8])));
        // stream ended, so the switch is gone again
        assert!(!c.is_connected(0xab));
    }

    #[test]
    fn test_serve_skips_malformed_frames() {
        let c = controller();
        let mut inbound = Message::encode(0, &features(7)).unwrap();
        inbound.extend(&[0x04, 0x0e, 0x00, 0x0c, 0, 0, 0, 1, 0xff, 0xff, 0xff, 0xff]);
        inbound.extend(Message::encode(2, &Message::EchoRequest(vec![])).unwrap());
        let sink = Sink::default();
        c.serve(Cursor::new(inbound), Box::new(sink.clone())).unwrap();
        assert_eq!(sink.messages().last(), Some(&(2, Message::EchoReply(vec![]))));
    }

    #[test]
    fn test_read_frame_rejects_short_length() {
        let mut cursor = Cursor::new(vec![0x04, 0x00, 0x00, 0x04, 0, 0, 0, 0]);
        assert!(read_frame(&mut cursor).is_err());
        let mut truncated = Cursor::new(vec![0x04, 0x00, 0x00]);
        assert!(read_frame(&mut truncated).is_err());
    }

    #[test]
    fn test_old_session_end_keeps_reconnected_switch() {
        let c = controller();
        let events = Arc::new(Lifecycle::default());
        c.register_switch_listener(events.clone());
        let (tx_a, feed_a) = feed();
        let (tx_b, feed_b) = feed();
        let sink_b = Sink::default();

        thread::scope(|scope| {
            let a = scope.spawn(|| c.serve(feed_a, Box::new(Sink::default())));
            tx_a.send(Message::encode(0, &features(9)).unwrap()).unwrap();
            assert!(eventually(|| events.events().len() == 1));

            let b = scope.spawn(|| c.serve(feed_b, Box::new(sink_b.clone())));
            tx_b.send(Message::encode(0, &features(9)).unwrap()).unwrap();
            assert!(eventually(|| events.events().len() == 2));

            drop(tx_a);
            a.join().unwrap().unwrap();
            assert!(c.is_connected(9));
            assert_eq!(c.add_entry(&FlowTableEntry::insert(), 9).unwrap(), 1);
            assert!(matches!(sink_b.messages().last(), Some((1, Message::FlowMod(_)))));
            assert_eq!(events.events(), vec![(true, 9), (true, 9)]);

            drop(tx_b);
            b.join().unwrap().unwrap();
        });
        assert!(!c.is_connected(9));
        assert_eq!(events.events(), vec![(true, 9), (true, 9), (false, 9)]);
    }

    #[test]
    fn test_session_ended_only_for_live_connection() {
        let c = controller();
        let old = c.switch_connected(4, Box::new(Sink::default())).unwrap();
        let new = c.switch_connected(4, Box::new(Sink::default())).unwrap();
        assert_eq!(old.dpid(), 4);
        assert!(!c.session_ended(&old));
        assert!(c.is_connected(4));
        assert!(c.session_ended(&new));
        assert!(!c.is_connected(4));
        assert!(!c.session_ended(&new));
    }

    #[test]
    fn test_failed_stats_request_is_still_correlated() {
        let c = controller();
        c.switch_connected(5, Box::new(Sink::default())).unwrap();
        let future = c.get_stats(5, StatType::Flow).unwrap().unwrap();
        let xid = future.xid();
        let err = Message::Error(ErrorMsg { err_type: 1, code: 2, data: vec![] });
        c.on_message(5, &Message::encode(xid, &err).unwrap()).unwrap();
        assert!(future.wait(Duration::from_secs(1)).is_none());
        assert!(lock(&c.pending_stats).is_empty());

        let rec = FailureRecorder::new();
        assert_eq!(c.barrier(5, Some(&rec)).unwrap(), false);
        assert_eq!(rec.failed_xids(), vec![xid]);
    }

    #[test]
    fn test_port_status_does_not_reach_listeners() {
        let c = controller();
        let events = Arc::new(Lifecycle::default());
        c.register_switch_listener(events.clone());
        c.switch_connected(5, Box::new(Sink::default())).unwrap();

        // reason, pad, then a 64 byte port description for port 3
        let mut body = vec![2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3];
        body.resize(8 + 64, 0);
        let status = Message::Unhandled(MsgCode::PortStatus as u8, body);
        c.on_message(5, &Message::encode(0, &status).unwrap()).unwrap();
        // too short to carry a port number
        let status = Message::Unhandled(MsgCode::PortStatus as u8, vec![0]);
        c.on_message(5, &Message::encode(0, &status).unwrap()).unwrap();
        assert_eq!(events.events(), vec![(true, 5)]);
    }

    #[test]
    fn test_link_updates_fan_out() {
        let c = controller();
        let links = Arc::new(Links::default());
        let listener: Arc<dyn LinkDiscoveryListener> = links.clone();
        let other = Arc::new(Links::default());
        assert!(c.register_link_discovery_listener(listener.clone()));
        assert!(!c.register_link_discovery_listener(listener.clone()));
        assert!(c.register_link_discovery_listener(other.clone()));

        let update = LinkUpdate { src: 1, src_port: 2, dst: 3, dst_port: 4, removed: false };
        c.notify_link_updates(&[update.clone()]);
        assert_eq!(*lock(&links.0), vec![update.clone()]);
        assert_eq!(*lock(&other.0), vec![update.clone()]);

        assert!(c.unregister_link_discovery_listener(&listener));
        assert!(!c.unregister_link_discovery_listener(&listener));
        c.notify_link_updates(&[LinkUpdate { removed: true, ..update.clone() }]);
        assert_eq!(lock(&links.0).len(), 1);
        assert_eq!(lock(&other.0).len(), 2);
    }

    #[test]
    fn test_replies_for_unknown_switch_leave_no_queue() {
        let c = controller();
        let reply = Message::encode(1, &Message::BarrierReply).unwrap();
        assert!(matches!(c.on_message(8, &reply), Err(Error::SwitchNotFound(8))));
        assert!(!c.queues.contains(8));

        c.switch_connected(8, Box::new(Sink::default())).unwrap();
        assert_eq!(c.add_entry(&FlowTableEntry::insert(), 8).unwrap(), 1);
        assert_eq!(c.add_entry(&FlowTableEntry::insert(), 8).unwrap(), 2);
        c.switch_disconnected(8);
        assert!(c.on_message(8, &reply).is_err());
        assert!(c.add_entry(&FlowTableEntry::insert(), 8).is_err());
        assert!(!c.queues.contains(8));

        c.switch_connected(8, Box::new(Sink::default())).unwrap();
        assert_eq!(c.add_entry(&FlowTableEntry::insert(), 8).unwrap(), 1);
    }

    #[test]
    fn test_shutdown_all_now() {
        let c = Controller::new(ControllerConfig {
            barrier_timeout_ms: 10_000,
            barrier_poll_interval_ms: 10,
            ..Default::default()
        })
        .unwrap();
        let events = Arc::new(Lifecycle::default());
        c.register_switch_listener(events.clone());
        c.switch_connected(5, Box::new(Sink::default())).unwrap();
        c.switch_connected(6, Box::new(Sink::default())).unwrap();
        let future = c.get_stats(5, StatType::Desc).unwrap().unwrap();

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let start = Instant::now();
                (c.barrier(6, None), start.elapsed())
            });
            thread::sleep(Duration::from_millis(50));
            c.shutdown_all_now();
            let (outcome, waited) = waiter.join().unwrap();
            assert!(matches!(outcome, Ok(false) | Err(Error::SwitchNotFound(6))));
            assert!(waited < Duration::from_secs(5));
        });

        assert!(future.wait(Duration::from_secs(1)).is_none());
        assert!(c.connected_switches().is_empty());
        let mut events = events.events();
        events.sort();
        assert_eq!(events, vec![(false, 5), (false, 6), (true, 5), (true, 6)]);
        assert!(matches!(c.add_entry(&FlowTableEntry::insert(), 5), Err(Error::SwitchNotFound(5))));
        assert!(matches!(c.switch_connected(7, Box::new(Sink::default())), Err(Error::ShutDown)));
        let inbound = Message::encode(0, &features(7)).unwrap();
        assert!(matches!(c.serve(Cursor::new(inbound), Box::new(Sink::default())), Err(Error::ShutDown)));
    }

    #[test]
    fn test_shutdown_closes_accepted_sockets() {
        let c = controller();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::scope(|scope| {
            let server = scope.spawn(|| {
                let (stream, _) = listener.accept().unwrap();
                c.handle_client_connected(stream)
            });
            let mut client = TcpStream::connect(addr).unwrap();
            client.write_all(&Message::encode(0, &features(0x42)).unwrap()).unwrap();
            assert!(eventually(|| c.is_connected(0x42)));

            c.shutdown_all_now();
            // the read loop sees the socket close and returns
            let _ = server.join().unwrap();
            assert!(lock(&c.streams).is_empty());
        });
        assert!(!c.is_connected(0x42));
    }
}
