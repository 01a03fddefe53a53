//! Demultiplexer source pipe.
//!
//! Wraps an abstract container demuxer (the concrete library is external
//! to the runtime) as a split source: once a URL is set and the managers
//! are plumbed, the source probes the container under the global deal
//! token, raises one `SplitAddFlow` per elementary stream, then reads one
//! access unit per idler iteration and forwards it to the sub-pipe
//! serving that stream.
//!
//! Sub-pipes ("outputs") are allocated through a secondary manager; each
//! carries the numeric stream id of its flow definition, unique per
//! source, plus its own output pipe and buffer manager.

use std::sync::{Arc, Mutex, Weak};

use sluice_core::error::{Error, Result};
use sluice_core::ubuf::UbufMgrRef;
use sluice_core::uclock::Uclock;
use sluice_core::udict::Urational;
use sluice_core::upipe::output::OutputHelper;
use sluice_core::upipe::{self, Command, Reply, Upipe, UpipeMgr, UpipeRef, UprobeRef, probe};
use sluice_core::upump::{PumpCtl, Upump, UpumpMgr};
use sluice_core::uref::block_flow::block_flow_alloc_def;
use sluice_core::uref::sound_flow::sound_flow_alloc_def;
use sluice_core::uref::{Uref, UrefMgr};

use crate::deal;

/// FOURCC signature of the demux source pipe.
pub const DEMUX_SRC_SIGNATURE: u32 = upipe::fourcc(b"dmxs");
/// FOURCC signature of its output sub-pipes.
pub const DEMUX_SRC_OUTPUT_SIGNATURE: u32 = upipe::fourcc(b"dmxo");

// ---------------------------------------------------------------------------
// External demuxer interface
// ---------------------------------------------------------------------------

/// Timing and payload of one access unit. Timestamps are in 27 MHz
/// ticks of the stream clock.
pub struct DemuxPacket {
    pub stream: u64,
    pub data: Vec<u8>,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
}

/// What a container declares about one elementary stream.
pub struct StreamInfo {
    pub id: u64,
    pub kind: StreamKind,
    /// ISO-639 language from container metadata.
    pub language: Option<String>,
}

pub enum StreamKind {
    RawAudio {
        channels: u8,
        sample_size: u8,
        rate: u64,
        block_align: Option<u64>,
    },
    CodedAudio {
        /// Codec name as a flow-definition component (`"aac"`, `"mp2"`).
        codec: String,
        channels: u8,
        rate: u64,
        octetrate: Option<u64>,
        block_align: Option<u64>,
    },
    CodedVideo {
        codec: String,
        width: u64,
        height: u64,
        fps: Option<Urational>,
        octetrate: Option<u64>,
    },
    RawVideo,
    Subtitles,
    Data,
}

/// The external demuxing library, reduced to what the source consumes.
pub trait Demuxer: Send + Sync {
    /// Opens a URL. Errors are foreign-library strings.
    fn open(
        &self,
        url: &str,
        options: &[(String, String)],
    ) -> std::result::Result<Box<dyn DemuxContext>, String>;
}

/// An opened container.
pub trait DemuxContext: Send {
    /// Discovers the elementary streams. Callers hold the global deal
    /// token across this call: stream probing may initialize
    /// non-reentrant library state.
    fn probe_streams(&mut self) -> std::result::Result<Vec<StreamInfo>, String>;

    /// Reads the next access unit; `None` at end of flow.
    fn read(&mut self) -> std::result::Result<Option<DemuxPacket>, String>;
}

/// Builds the flow definition advertising one stream.
fn flow_def_for_stream(uref_mgr: &Arc<UrefMgr>, info: &StreamInfo) -> Result<Uref> {
    let mut flow_def = match &info.kind {
        StreamKind::RawAudio {
            channels,
            sample_size,
            rate,
            block_align,
        } => {
            let mut flow_def = sound_flow_alloc_def(uref_mgr, *channels, *sample_size)?;
            flow_def.set_sound_rate(*rate);
            if let Some(block_align) = block_align {
                flow_def
                    .set_sound_samples(block_align / *sample_size as u64 / *channels as u64);
            }
            flow_def
        }
        StreamKind::CodedAudio {
            codec,
            channels,
            rate,
            octetrate,
            block_align,
        } => {
            let mut flow_def = block_flow_alloc_def(uref_mgr, &format!("{codec}."))?;
            if let Some(octetrate) = octetrate {
                flow_def.set_block_octetrate(*octetrate);
            }
            flow_def.set_sound_channels(*channels);
            flow_def.set_sound_rate(*rate);
            if let Some(block_align) = block_align {
                flow_def.set_block_size(*block_align);
            }
            flow_def
        }
        StreamKind::CodedVideo {
            codec,
            width,
            height,
            fps,
            octetrate,
        } => {
            let mut flow_def = block_flow_alloc_def(uref_mgr, &format!("{codec}."))?;
            if let Some(octetrate) = octetrate {
                flow_def.set_block_octetrate(*octetrate);
            }
            flow_def.set_pic_hsize(*width);
            flow_def.set_pic_vsize(*height);
            if let Some(fps) = fps {
                flow_def.set_pic_fps(*fps);
            }
            flow_def
        }
        StreamKind::RawVideo | StreamKind::Subtitles | StreamKind::Data => {
            return Err(Error::Unsupported);
        }
    };
    flow_def.set_flow_id(info.id);
    if let Some(lang) = &info.language {
        flow_def.set_flow_lang(lang);
    }
    Ok(flow_def)
}

// ---------------------------------------------------------------------------
// Manager-private control surface
// ---------------------------------------------------------------------------

/// Manager-private commands of the demux source, carried through
/// `Command::Extra` gated by [`DEMUX_SRC_SIGNATURE`].
pub enum DemuxSrcCommand {
    /// Opens (or closes, with `None`) a URL.
    SetUrl(Option<String>),
    GetUrl,
    /// Sets a demuxer option, applied at the next URL open. `None`
    /// deletes the option.
    SetOption { name: String, value: Option<String> },
    GetOption(String),
    /// Reading time in clock units.
    GetTime,
    /// Seek to a time in clock units.
    SetTime(u64),
}

/// Replies to [`DemuxSrcCommand`], carried through `Reply::Extra`.
#[derive(Debug, PartialEq, Eq)]
pub enum DemuxSrcReply {
    Url(Option<String>),
    Option(Option<String>),
}

/// Convenience wrapper building the gated command.
pub fn demux_src_command(command: DemuxSrcCommand) -> Command {
    Command::Extra {
        signature: DEMUX_SRC_SIGNATURE,
        args: Box::new(command),
    }
}

// ---------------------------------------------------------------------------
// Source pipe
// ---------------------------------------------------------------------------

/// Manager allocating demux source pipes over one external demuxer.
pub struct DemuxSrcMgr {
    format: Arc<dyn Demuxer>,
}

impl DemuxSrcMgr {
    pub fn new(format: Arc<dyn Demuxer>) -> Arc<Self> {
        Arc::new(Self { format })
    }

    /// Typed allocation, giving access to the source's output manager.
    pub fn alloc_src(self: &Arc<Self>, probe_chain: UprobeRef) -> Result<Arc<DemuxSrcPipe>> {
        let pipe = Arc::new_cyclic(|weak| DemuxSrcPipe {
            probe: probe_chain,
            format: Arc::clone(&self.format),
            weak_self: weak.clone(),
            state: Mutex::new(SrcState::default()),
            outputs: Mutex::new(Vec::new()),
        });
        probe::throw_ready(pipe.as_ref());
        Ok(pipe)
    }
}

impl UpipeMgr for DemuxSrcMgr {
    fn signature(&self) -> u32 {
        DEMUX_SRC_SIGNATURE
    }

    fn alloc(self: Arc<Self>, probe_chain: UprobeRef) -> Result<UpipeRef> {
        self.alloc_src(probe_chain).map(|pipe| pipe as UpipeRef)
    }
}

#[derive(Default)]
struct SrcState {
    uref_mgr: Option<Arc<UrefMgr>>,
    upump_mgr: Option<Arc<dyn UpumpMgr>>,
    uclock: Option<Arc<dyn Uclock>>,
    /// Read watcher, one access unit per invocation.
    worker: Option<Upump>,
    /// Idler polling the global deal token before probing.
    deal_pump: Option<Upump>,
    url: Option<String>,
    options: Vec<(String, String)>,
    context: Option<Box<dyn DemuxContext>>,
    probed: bool,
}

/// Demultiplexer source pipe.
pub struct DemuxSrcPipe {
    probe: UprobeRef,
    format: Arc<dyn Demuxer>,
    weak_self: Weak<DemuxSrcPipe>,
    state: Mutex<SrcState>,
    outputs: Mutex<Vec<Weak<DemuxSrcOutput>>>,
}

impl DemuxSrcPipe {
    /// The secondary manager allocating output sub-pipes of this source.
    pub fn output_mgr(self: &Arc<Self>) -> Arc<dyn UpipeMgr> {
        Arc::new(DemuxSrcOutputMgr {
            parent: Arc::downgrade(self),
        })
    }

    fn set_url(&self, url: Option<String>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.context.is_some() {
                if let Some(old) = &state.url {
                    log::info!("closing URL {old}");
                }
                state.context = None;
                state.worker = None;
                state.deal_pump = None;
            }
            state.url = None;
            state.probed = false;
        }

        let Some(url) = url else {
            return Ok(());
        };

        if self.state.lock().unwrap().uref_mgr.is_none() {
            probe::throw_need_uref_mgr(self);
            if self.state.lock().unwrap().uref_mgr.is_none() {
                return Err(Error::WrongState);
            }
        }
        if self.state.lock().unwrap().upump_mgr.is_none() {
            probe::throw_need_upump_mgr(self);
            if self.state.lock().unwrap().upump_mgr.is_none() {
                return Err(Error::WrongState);
            }
        }

        let options = self.state.lock().unwrap().options.clone();
        let context = self.format.open(&url, &options).map_err(|err| {
            log::error!("can't open URL {url} ({err})");
            Error::External(err)
        })?;

        log::info!("opening URL {url}");
        let mut state = self.state.lock().unwrap();
        state.context = Some(context);
        state.url = Some(url);
        Ok(())
    }

    fn get_option(&self, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn set_option(&self, name: String, value: Option<String>) {
        let mut state = self.state.lock().unwrap();
        state.options.retain(|(n, _)| *n != name);
        if let Some(value) = value {
            state.options.push((name, value));
        }
    }

    /// After any successful control: start probing or reading when the
    /// prerequisites are in place.
    fn check_status(self: &Arc<Self>) {
        let (ready, probed) = {
            let state = self.state.lock().unwrap();
            (
                state.upump_mgr.is_some()
                    && state.url.is_some()
                    && state.worker.is_none()
                    && state.deal_pump.is_none(),
                state.probed,
            )
        };
        if !ready {
            return;
        }
        if probed {
            self.start_worker();
        } else {
            self.start_deal();
        }
    }

    /// Installs the idler polling the global deal token.
    fn start_deal(self: &Arc<Self>) {
        let upump_mgr = match self.state.lock().unwrap().upump_mgr.clone() {
            Some(mgr) => mgr,
            None => return,
        };
        let weak = self.weak_self.clone();
        let pump = match deal::alloc_pump(
            &upump_mgr,
            Box::new(move |_ctl| {
                if let Some(pipe) = weak.upgrade() {
                    pipe.probe_tick();
                }
            }),
        ) {
            Ok(pump) => pump,
            Err(_) => {
                log::error!("can't create dealer");
                probe::throw_upump_error(self.as_ref());
                return;
            }
        };
        if pump.start().is_err() {
            probe::throw_upump_error(self.as_ref());
            return;
        }
        self.state.lock().unwrap().deal_pump = Some(pump);
    }

    /// One deal-poll iteration: grab, probe the container, yield, emit
    /// flows, start reading.
    fn probe_tick(self: &Arc<Self>) {
        if !deal::grab() {
            return;
        }
        let result = {
            let mut state = self.state.lock().unwrap();
            match state.context.as_mut() {
                Some(context) => context.probe_streams(),
                None => Err("no context".to_owned()),
            }
        };
        deal::yield_token();
        {
            let mut state = self.state.lock().unwrap();
            state.deal_pump = None;
            state.probed = true;
        }

        let streams = match result {
            Ok(streams) => streams,
            Err(err) => {
                let mut state = self.state.lock().unwrap();
                let url = state.url.take();
                log::error!(
                    "can't probe URL {} ({err})",
                    url.as_deref().unwrap_or("<none>")
                );
                if let Some(url) = &url {
                    log::info!("closing URL {url}");
                }
                state.context = None;
                return;
            }
        };

        let uref_mgr = match self.state.lock().unwrap().uref_mgr.clone() {
            Some(mgr) => mgr,
            None => return,
        };
        for info in &streams {
            let flow_def = match flow_def_for_stream(&uref_mgr, info) {
                Ok(flow_def) => flow_def,
                Err(_) => {
                    log::warn!("unsupported track type (stream {})", info.id);
                    continue;
                }
            };
            probe::split_throw_add_flow(self.as_ref(), info.id, &flow_def);
        }

        self.start_worker();
    }

    /// Installs the read idler.
    fn start_worker(self: &Arc<Self>) {
        let upump_mgr = match self.state.lock().unwrap().upump_mgr.clone() {
            Some(mgr) => mgr,
            None => return,
        };
        let weak = self.weak_self.clone();
        let pump = match Upump::alloc_idler(
            &upump_mgr,
            Box::new(move |ctl| {
                if let Some(pipe) = weak.upgrade() {
                    pipe.worker_tick(ctl);
                }
            }),
        ) {
            Ok(pump) => pump,
            Err(_) => {
                probe::throw_upump_error(self.as_ref());
                return;
            }
        };
        if pump.start().is_err() {
            probe::throw_upump_error(self.as_ref());
            return;
        }
        self.state.lock().unwrap().worker = Some(pump);
    }

    fn stop_worker(&self) {
        self.state.lock().unwrap().worker = None;
    }

    fn find_output(&self, id: u64) -> Option<Arc<DemuxSrcOutput>> {
        let outputs = self.outputs.lock().unwrap();
        outputs
            .iter()
            .filter_map(Weak::upgrade)
            .find(|output| output.inner.lock().unwrap().id == Some(id))
    }

    /// One read iteration: one access unit in, one record out.
    fn worker_tick(self: &Arc<Self>, pump: &PumpCtl) {
        let read = {
            let mut state = self.state.lock().unwrap();
            state.context.as_mut().map(|context| context.read())
        };
        let Some(read) = read else {
            self.stop_worker();
            return;
        };

        let packet = match read {
            Err(err) => {
                let url = self.state.lock().unwrap().url.clone();
                log::error!(
                    "read error from {} ({err})",
                    url.as_deref().unwrap_or("<none>")
                );
                self.stop_worker();
                probe::throw_read_end(self.as_ref(), url.as_deref());
                return;
            }
            Ok(None) => {
                self.stop_worker();
                probe::throw_source_end(self.as_ref());
                return;
            }
            Ok(Some(packet)) => packet,
        };

        let Some(output) = self.find_output(packet.stream) else {
            return;
        };

        // Resolve a buffer manager for this output, asking the probe
        // chain once if none is plumbed yet.
        let block_mgr = {
            let need_throw = output.inner.lock().unwrap().ubuf_mgr.is_none();
            if need_throw {
                let flow_def = output
                    .inner
                    .lock()
                    .unwrap()
                    .helper
                    .flow_def()
                    .map(Uref::dup);
                if let Some(flow_def) = flow_def {
                    probe::throw_need_ubuf_mgr(output.as_ref() as &dyn Upipe, &flow_def);
                }
            }
            match output.inner.lock().unwrap().ubuf_mgr.clone() {
                Some(UbufMgrRef::Block(mgr)) => mgr,
                Some(UbufMgrRef::Pic(_)) => {
                    log::warn!("picture buffer manager on a block output, unit dropped");
                    return;
                }
                None => return,
            }
        };

        let uref_mgr = match self.state.lock().unwrap().uref_mgr.clone() {
            Some(mgr) => mgr,
            None => return,
        };
        let mut uref = match uref_mgr.alloc_block(&block_mgr, packet.data.len()) {
            Ok(uref) => uref,
            Err(_) => {
                probe::throw_alloc_error(self.as_ref());
                return;
            }
        };
        {
            let block = match uref.ubuf_mut() {
                Some(ubuf) => match ubuf.as_block_mut() {
                    Ok(block) => block,
                    Err(_) => return,
                },
                None => return,
            };
            if block.write_bytes(0, &packet.data).is_err() {
                probe::throw_alloc_error(self.as_ref());
                return;
            }
        }

        if let Some(uclock) = self.state.lock().unwrap().uclock.clone() {
            uref.set_systime(uclock.now());
        }
        if let Some(pts) = packet.pts {
            uref.set_pts_orig(pts);
        }
        if let Some(dts) = packet.dts {
            uref.set_dts_orig(dts);
        }

        output.forward(uref, Some(pump));
    }
}

impl Upipe for DemuxSrcPipe {
    fn signature(&self) -> u32 {
        DEMUX_SRC_SIGNATURE
    }

    fn probe(&self) -> &UprobeRef {
        &self.probe
    }

    fn control(&self, command: Command) -> Result<Reply> {
        let this = match self.weak_self.upgrade() {
            Some(this) => this,
            None => return Err(Error::WrongState),
        };
        let reply = match command {
            Command::GetUrefMgr => Ok(Reply::UrefMgr(self.state.lock().unwrap().uref_mgr.clone())),
            Command::SetUrefMgr(mgr) => {
                self.state.lock().unwrap().uref_mgr = Some(mgr);
                Ok(Reply::Ack)
            }
            Command::GetUpumpMgr => Ok(Reply::UpumpMgr(
                self.state.lock().unwrap().upump_mgr.clone(),
            )),
            Command::SetUpumpMgr(mgr) => {
                let mut state = self.state.lock().unwrap();
                // Watchers belong to the previous loop; drop them first.
                state.worker = None;
                state.deal_pump = None;
                state.upump_mgr = Some(mgr);
                Ok(Reply::Ack)
            }
            Command::GetUclock => Ok(Reply::Uclock(self.state.lock().unwrap().uclock.clone())),
            Command::SetUclock(clock) => {
                self.state.lock().unwrap().uclock = Some(clock);
                Ok(Reply::Ack)
            }
            Command::Extra { signature, args } => {
                let command =
                    upipe::extra_args::<DemuxSrcCommand>(signature, DEMUX_SRC_SIGNATURE, args)?;
                match *command {
                    DemuxSrcCommand::SetUrl(url) => self.set_url(url).map(|()| Reply::Ack),
                    DemuxSrcCommand::GetUrl => Ok(Reply::Extra(Box::new(DemuxSrcReply::Url(
                        self.state.lock().unwrap().url.clone(),
                    )))),
                    DemuxSrcCommand::SetOption { name, value } => {
                        self.set_option(name, value);
                        Ok(Reply::Ack)
                    }
                    DemuxSrcCommand::GetOption(name) => Ok(Reply::Extra(Box::new(
                        DemuxSrcReply::Option(self.get_option(&name)),
                    ))),
                    // Reading/seeking by time has no defined semantics yet.
                    DemuxSrcCommand::GetTime | DemuxSrcCommand::SetTime(_) => {
                        Err(Error::Unsupported)
                    }
                }
            }
            _ => Err(Error::Unsupported),
        };
        if reply.is_ok() {
            this.check_status();
        }
        reply
    }
}

impl Drop for DemuxSrcPipe {
    fn drop(&mut self) {
        if let Ok(state) = self.state.lock() {
            if let Some(url) = &state.url {
                log::info!("closing URL {url}");
            }
        }
        probe::throw_dead(self);
    }
}

// ---------------------------------------------------------------------------
// Output sub-pipes
// ---------------------------------------------------------------------------

struct DemuxSrcOutputMgr {
    parent: Weak<DemuxSrcPipe>,
}

impl UpipeMgr for DemuxSrcOutputMgr {
    fn signature(&self) -> u32 {
        DEMUX_SRC_OUTPUT_SIGNATURE
    }

    fn alloc(self: Arc<Self>, probe_chain: UprobeRef) -> Result<UpipeRef> {
        let parent = self.parent.upgrade().ok_or(Error::WrongState)?;
        let output = Arc::new(DemuxSrcOutput {
            probe: probe_chain,
            parent: self.parent.clone(),
            inner: Mutex::new(OutputState::default()),
        });
        parent.outputs.lock().unwrap().push(Arc::downgrade(&output));
        probe::throw_ready(output.as_ref());
        Ok(output)
    }
}

#[derive(Default)]
struct OutputState {
    /// Stream id served, from the flow definition.
    id: Option<u64>,
    helper: OutputHelper,
    ubuf_mgr: Option<UbufMgrRef>,
}

/// One output sub-pipe of a demux source.
pub struct DemuxSrcOutput {
    probe: UprobeRef,
    parent: Weak<DemuxSrcPipe>,
    inner: Mutex<OutputState>,
}

impl DemuxSrcOutput {
    fn set_flow_def(&self, flow_def: Uref) -> Result<()> {
        let id = flow_def.get_flow_id().map_err(|_| Error::BadArg)?;

        if let Some(parent) = self.parent.upgrade() {
            let outputs = parent.outputs.lock().unwrap();
            for other in outputs.iter().filter_map(Weak::upgrade) {
                if std::ptr::eq(other.as_ref(), self) {
                    continue;
                }
                if other.inner.lock().unwrap().id == Some(id) {
                    log::warn!("stream id {id} is already in use");
                    return Err(Error::BadArg);
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.id = Some(id);
        inner.helper.store_flow_def(Some(flow_def.dup()));
        Ok(())
    }

    /// Forwards a record downstream; clones what is needed under the
    /// lock, delivers outside it.
    fn forward(&self, uref: Uref, pump: Option<&PumpCtl>) {
        let prepared = self.inner.lock().unwrap().helper.prepare();
        let Some((output, flow_def)) = prepared else {
            log::warn!("no output designated, unit dropped");
            return;
        };
        if let Some(flow_def) = flow_def {
            output.input(flow_def, pump);
        }
        output.input(uref, pump);
    }
}

impl Upipe for DemuxSrcOutput {
    fn signature(&self) -> u32 {
        DEMUX_SRC_OUTPUT_SIGNATURE
    }

    fn probe(&self) -> &UprobeRef {
        &self.probe
    }

    fn control(&self, command: Command) -> Result<Reply> {
        match command {
            Command::GetUbufMgr => Ok(Reply::UbufMgr(self.inner.lock().unwrap().ubuf_mgr.clone())),
            Command::SetUbufMgr(mgr) => {
                self.inner.lock().unwrap().ubuf_mgr = Some(mgr);
                Ok(Reply::Ack)
            }
            Command::GetOutput => Ok(Reply::Output(
                self.inner.lock().unwrap().helper.output().cloned(),
            )),
            Command::SetOutput(output) => {
                self.inner.lock().unwrap().helper.set_output(output);
                Ok(Reply::Ack)
            }
            Command::GetFlowDef => Ok(Reply::FlowDef(
                self.inner.lock().unwrap().helper.flow_def().map(Uref::dup),
            )),
            Command::SetFlowDef(flow_def) => self.set_flow_def(flow_def).map(|()| Reply::Ack),
            _ => Err(Error::Unsupported),
        }
    }
}

impl Drop for DemuxSrcOutput {
    fn drop(&mut self) {
        probe::throw_dead(self);
        if let Some(parent) = self.parent.upgrade() {
            parent
                .outputs
                .lock()
                .unwrap()
                .retain(|weak| weak.upgrade().is_some());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upump_poll::PollUpumpMgr;
    use sluice_core::ubuf::UbufBlockMgr;
    use sluice_core::udict::UdictMgr;
    use sluice_core::umem::HeapUmemMgr;
    use sluice_core::upipe::{Event, LogProbe, ProbeResult, Uprobe};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -----------------------------------------------------------------------
    // Mock demuxer
    // -----------------------------------------------------------------------

    pub(crate) struct MockDemuxer {
        pub streams: Vec<(u64, &'static str)>,
        pub packets: Vec<(u64, Vec<u8>)>,
        pub fail_open: bool,
    }

    impl Demuxer for MockDemuxer {
        fn open(
            &self,
            url: &str,
            _options: &[(String, String)],
        ) -> std::result::Result<Box<dyn DemuxContext>, String> {
            if self.fail_open {
                return Err(format!("cannot open {url}"));
            }
            Ok(Box::new(MockContext {
                streams: self.streams.clone(),
                packets: self.packets.clone(),
                cursor: 0,
            }))
        }
    }

    struct MockContext {
        streams: Vec<(u64, &'static str)>,
        packets: Vec<(u64, Vec<u8>)>,
        cursor: usize,
    }

    impl DemuxContext for MockContext {
        fn probe_streams(&mut self) -> std::result::Result<Vec<StreamInfo>, String> {
            Ok(self
                .streams
                .iter()
                .map(|&(id, codec)| StreamInfo {
                    id,
                    kind: StreamKind::CodedVideo {
                        codec: codec.to_owned(),
                        width: 720,
                        height: 576,
                        fps: Some(Urational::new(25, 1)),
                        octetrate: Some(500_000),
                    },
                    language: Some("eng".to_owned()),
                })
                .collect())
        }

        fn read(&mut self) -> std::result::Result<Option<DemuxPacket>, String> {
            let Some((stream, data)) = self.packets.get(self.cursor).cloned() else {
                return Ok(None);
            };
            self.cursor += 1;
            Ok(Some(DemuxPacket {
                stream,
                data,
                pts: Some(27_000_000 * self.cursor as u64),
                dts: None,
            }))
        }
    }

    /// Probe collecting `SplitAddFlow` events and wiring managers on
    /// demand, the way an application probe chain would.
    struct HarnessProbe {
        flows: Mutex<Vec<(u64, String)>>,
        source_ends: AtomicUsize,
        uref_mgr: Arc<UrefMgr>,
        block_mgr: Arc<UbufBlockMgr>,
    }

    impl Uprobe for HarnessProbe {
        fn on_event(&self, pipe: &dyn Upipe, event: &Event<'_>) -> ProbeResult {
            match event {
                Event::SplitAddFlow(id, flow_def) => {
                    self.flows
                        .lock()
                        .unwrap()
                        .push((*id, flow_def.get_flow_def().unwrap_or("?").to_owned()));
                    ProbeResult::Handled
                }
                Event::NeedUrefMgr => {
                    pipe.control(Command::SetUrefMgr(Arc::clone(&self.uref_mgr)))
                        .unwrap();
                    ProbeResult::Handled
                }
                Event::NeedUbufMgr(_) => {
                    pipe.control(Command::SetUbufMgr(UbufMgrRef::Block(Arc::clone(
                        &self.block_mgr,
                    ))))
                    .unwrap();
                    ProbeResult::Handled
                }
                Event::SourceEnd => {
                    self.source_ends.fetch_add(1, Ordering::Relaxed);
                    ProbeResult::Handled
                }
                _ => ProbeResult::Forward,
            }
        }
    }

    /// Sink collecting forwarded records.
    struct CollectSink {
        probe: UprobeRef,
        records: Mutex<Vec<(Option<String>, Option<u64>, usize)>>,
    }

    impl CollectSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                probe: LogProbe::new(),
                records: Mutex::new(Vec::new()),
            })
        }
    }

    impl Upipe for CollectSink {
        fn signature(&self) -> u32 {
            upipe::fourcc(b"sink")
        }
        fn probe(&self) -> &UprobeRef {
            &self.probe
        }
        fn input(&self, uref: Uref, _pump: Option<&PumpCtl>) {
            let flow = uref.get_flow_def().ok().map(str::to_owned);
            let pts = uref.get_pts_orig().ok();
            let size = uref
                .ubuf()
                .and_then(|ubuf| ubuf.as_block().ok())
                .map_or(0, |block| block.total_size());
            self.records.lock().unwrap().push((flow, pts, size));
        }
        fn control(&self, _command: Command) -> Result<Reply> {
            Ok(Reply::Ack)
        }
    }

    fn harness_probe() -> (Arc<HarnessProbe>, Arc<UrefMgr>) {
        let uref_mgr = UrefMgr::new(UdictMgr::new(16, 32));
        let probe = Arc::new(HarnessProbe {
            flows: Mutex::new(Vec::new()),
            source_ends: AtomicUsize::new(0),
            uref_mgr: Arc::clone(&uref_mgr),
            block_mgr: UbufBlockMgr::new(16, HeapUmemMgr::new(), 0, 0, 0),
        });
        (probe, uref_mgr)
    }

    // -----------------------------------------------------------------------
    // Flow discovery
    // -----------------------------------------------------------------------

    #[test]
    fn probing_emits_one_flow_per_stream_before_any_input() {
        let (probe, _uref_mgr) = harness_probe();
        let format = Arc::new(MockDemuxer {
            streams: vec![(0, "mpeg2video"), (1, "aac")],
            packets: vec![(0, vec![1, 2, 3])],
            fail_open: false,
        });
        let mgr = DemuxSrcMgr::new(format);

        let loop_mgr = PollUpumpMgr::new();
        let src = mgr.alloc_src(probe.clone() as UprobeRef).unwrap();
        src.control(Command::SetUpumpMgr(loop_mgr.as_upump_mgr()))
            .unwrap();
        src.control(Command::SetUrefMgr(Arc::clone(&probe.uref_mgr)))
            .unwrap();
        src.control(demux_src_command(DemuxSrcCommand::SetUrl(Some(
            "mock://two-streams".to_owned(),
        ))))
        .unwrap();

        // No flow is known before the loop had a chance to probe.
        assert!(probe.flows.lock().unwrap().is_empty());
        loop_mgr.run();

        let flows = probe.flows.lock().unwrap();
        assert_eq!(flows.len(), 2);
        let ids: Vec<u64> = flows.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, [0, 1]);
        assert_eq!(flows[0].1, "block.mpeg2video.");
        assert_eq!(flows[1].1, "block.aac.");
        assert_eq!(probe.source_ends.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn failed_open_reports_external_error() {
        let (probe, _uref_mgr) = harness_probe();
        let format = Arc::new(MockDemuxer {
            streams: vec![],
            packets: vec![],
            fail_open: true,
        });
        let mgr = DemuxSrcMgr::new(format);
        let loop_mgr = PollUpumpMgr::new();
        let src = mgr.alloc_src(probe.clone() as UprobeRef).unwrap();
        src.control(Command::SetUpumpMgr(loop_mgr.as_upump_mgr()))
            .unwrap();
        src.control(Command::SetUrefMgr(Arc::clone(&probe.uref_mgr)))
            .unwrap();
        let err = src
            .control(demux_src_command(DemuxSrcCommand::SetUrl(Some(
                "mock://bad".to_owned(),
            ))))
            .err();
        assert!(matches!(err, Some(Error::External(_))));
    }

    // -----------------------------------------------------------------------
    // Options and stubs
    // -----------------------------------------------------------------------

    #[test]
    fn options_roundtrip_and_delete() {
        let (probe, _uref_mgr) = harness_probe();
        let mgr = DemuxSrcMgr::new(Arc::new(MockDemuxer {
            streams: vec![],
            packets: vec![],
            fail_open: false,
        }));
        let src = mgr.alloc_src(probe as UprobeRef).unwrap();

        src.control(demux_src_command(DemuxSrcCommand::SetOption {
            name: "probesize".to_owned(),
            value: Some("5000".to_owned()),
        }))
        .unwrap();
        let reply = src
            .control(demux_src_command(DemuxSrcCommand::GetOption(
                "probesize".to_owned(),
            )))
            .unwrap();
        match reply {
            Reply::Extra(boxed) => {
                let reply = boxed.downcast::<DemuxSrcReply>().unwrap();
                assert_eq!(*reply, DemuxSrcReply::Option(Some("5000".to_owned())));
            }
            _ => panic!("expected extra reply"),
        }

        src.control(demux_src_command(DemuxSrcCommand::SetOption {
            name: "probesize".to_owned(),
            value: None,
        }))
        .unwrap();
        let reply = src
            .control(demux_src_command(DemuxSrcCommand::GetOption(
                "probesize".to_owned(),
            )))
            .unwrap();
        match reply {
            Reply::Extra(boxed) => {
                let reply = boxed.downcast::<DemuxSrcReply>().unwrap();
                assert_eq!(*reply, DemuxSrcReply::Option(None));
            }
            _ => panic!("expected extra reply"),
        }
    }

    #[test]
    fn time_control_is_unsupported() {
        let (probe, _uref_mgr) = harness_probe();
        let mgr = DemuxSrcMgr::new(Arc::new(MockDemuxer {
            streams: vec![],
            packets: vec![],
            fail_open: false,
        }));
        let src = mgr.alloc_src(probe as UprobeRef).unwrap();
        assert_eq!(
            src.control(demux_src_command(DemuxSrcCommand::GetTime)).err(),
            Some(Error::Unsupported)
        );
        assert_eq!(
            src.control(demux_src_command(DemuxSrcCommand::SetTime(0)))
                .err(),
            Some(Error::Unsupported)
        );
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let (probe, _uref_mgr) = harness_probe();
        let mgr = DemuxSrcMgr::new(Arc::new(MockDemuxer {
            streams: vec![],
            packets: vec![],
            fail_open: false,
        }));
        let src = mgr.alloc_src(probe as UprobeRef).unwrap();
        let err = src
            .control(Command::Extra {
                signature: upipe::fourcc(b"nope"),
                args: Box::new(DemuxSrcCommand::GetUrl),
            })
            .err();
        assert_eq!(err, Some(Error::Unsupported));
    }

    // -----------------------------------------------------------------------
    // Sub-pipe ids
    // -----------------------------------------------------------------------

    #[test]
    fn colliding_stream_ids_are_rejected() {
        let (probe, uref_mgr) = harness_probe();
        let mgr = DemuxSrcMgr::new(Arc::new(MockDemuxer {
            streams: vec![],
            packets: vec![],
            fail_open: false,
        }));
        let src = mgr.alloc_src(probe as UprobeRef).unwrap();
        let output_mgr = src.output_mgr();

        let out1 = output_mgr.clone().alloc(LogProbe::new()).unwrap();
        let out2 = output_mgr.alloc(LogProbe::new()).unwrap();

        let mut flow = uref_mgr.alloc_control();
        flow.set_flow_def("block.aac.");
        flow.set_flow_id(7);
        out1.control(Command::SetFlowDef(flow.dup())).unwrap();
        assert_eq!(
            out2.control(Command::SetFlowDef(flow.dup())).err(),
            Some(Error::BadArg)
        );

        // A different id is fine.
        let mut flow2 = uref_mgr.alloc_control();
        flow2.set_flow_def("block.mp2.");
        flow2.set_flow_id(8);
        out2.control(Command::SetFlowDef(flow2)).unwrap();
    }

    #[test]
    fn flow_def_without_id_is_rejected() {
        let (probe, uref_mgr) = harness_probe();
        let mgr = DemuxSrcMgr::new(Arc::new(MockDemuxer {
            streams: vec![],
            packets: vec![],
            fail_open: false,
        }));
        let src = mgr.alloc_src(probe as UprobeRef).unwrap();
        let out = src.output_mgr().alloc(LogProbe::new()).unwrap();

        let mut flow = uref_mgr.alloc_control();
        flow.set_flow_def("block.aac.");
        assert_eq!(
            out.control(Command::SetFlowDef(flow)).err(),
            Some(Error::BadArg)
        );
    }

    // -----------------------------------------------------------------------
    // File-backed URLs
    // -----------------------------------------------------------------------

    /// Demuxer treating the URL as a local path with a single video
    /// stream whose only unit is the file contents.
    struct FileDemuxer;

    impl Demuxer for FileDemuxer {
        fn open(
            &self,
            url: &str,
            _options: &[(String, String)],
        ) -> std::result::Result<Box<dyn DemuxContext>, String> {
            let data = std::fs::read(url).map_err(|err| err.to_string())?;
            Ok(Box::new(MockContext {
                streams: vec![(0, "mpeg2video")],
                packets: vec![(0, data)],
                cursor: 0,
            }))
        }
    }

    #[test]
    fn file_backed_url_opens_and_reads() {
        let (probe, uref_mgr) = harness_probe();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0x47u8, 0x1f, 0xff]).unwrap();

        let mgr = DemuxSrcMgr::new(Arc::new(FileDemuxer));
        let loop_mgr = PollUpumpMgr::new();
        let src = mgr.alloc_src(probe.clone() as UprobeRef).unwrap();
        src.control(Command::SetUpumpMgr(loop_mgr.as_upump_mgr()))
            .unwrap();
        src.control(Command::SetUrefMgr(Arc::clone(&uref_mgr)))
            .unwrap();

        // A missing path surfaces as an external error.
        let missing = src
            .control(demux_src_command(DemuxSrcCommand::SetUrl(Some(
                "/nonexistent/sluice-container".to_owned(),
            ))))
            .err();
        assert!(matches!(missing, Some(Error::External(_))));

        let sink = CollectSink::new();
        let out = src
            .output_mgr()
            .alloc(probe.clone() as UprobeRef)
            .unwrap();
        let mut flow = uref_mgr.alloc_control();
        flow.set_flow_def("block.mpeg2video.");
        flow.set_flow_id(0);
        out.control(Command::SetFlowDef(flow)).unwrap();
        out.control(Command::SetOutput(Some(sink.clone() as UpipeRef)))
            .unwrap();

        src.control(demux_src_command(DemuxSrcCommand::SetUrl(Some(
            file.path().display().to_string(),
        ))))
        .unwrap();
        loop_mgr.run();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0.as_deref(), Some("block.mpeg2video."));
        assert_eq!(records[1].2, 3);
        drop(records);
        drop(out);
    }

    // -----------------------------------------------------------------------
    // End-to-end read loop
    // -----------------------------------------------------------------------

    #[test]
    fn units_reach_their_outputs_with_flow_def_first() {
        let (probe, uref_mgr) = harness_probe();
        let format = Arc::new(MockDemuxer {
            streams: vec![(0, "mpeg2video"), (1, "aac")],
            packets: vec![
                (0, vec![1, 1, 1]),
                (1, vec![2, 2]),
                (0, vec![3]),
                (9, vec![9]), // unknown stream, dropped
            ],
            fail_open: false,
        });
        let mgr = DemuxSrcMgr::new(format);
        let loop_mgr = PollUpumpMgr::new();
        let src = mgr.alloc_src(probe.clone() as UprobeRef).unwrap();
        let output_mgr = src.output_mgr();

        src.control(Command::SetUpumpMgr(loop_mgr.as_upump_mgr()))
            .unwrap();
        src.control(Command::SetUrefMgr(Arc::clone(&uref_mgr)))
            .unwrap();

        // One sub-pipe per expected stream, wired to a collecting sink.
        let sinks: Vec<_> = (0..2).map(|_| CollectSink::new()).collect();
        let outs: Vec<_> = (0..2u64)
            .map(|id| {
                let out = output_mgr
                    .clone()
                    .alloc(probe.clone() as UprobeRef)
                    .unwrap();
                let mut flow = uref_mgr.alloc_control();
                flow.set_flow_def(if id == 0 {
                    "block.mpeg2video."
                } else {
                    "block.aac."
                });
                flow.set_flow_id(id);
                out.control(Command::SetFlowDef(flow)).unwrap();
                out.control(Command::SetOutput(Some(
                    sinks[id as usize].clone() as UpipeRef
                )))
                .unwrap();
                out
            })
            .collect();

        src.control(demux_src_command(DemuxSrcCommand::SetUrl(Some(
            "mock://av".to_owned(),
        ))))
        .unwrap();
        loop_mgr.run();

        let video = sinks[0].records.lock().unwrap();
        // Flow definition first, then the two video units in order.
        assert_eq!(video.len(), 3);
        assert_eq!(video[0].0.as_deref(), Some("block.mpeg2video."));
        assert_eq!(video[0].2, 0);
        assert_eq!(video[1].2, 3);
        assert_eq!(video[2].2, 1);
        assert!(video[1].1.is_some(), "origin PTS must be stamped");

        let audio = sinks[1].records.lock().unwrap();
        assert_eq!(audio.len(), 2);
        assert_eq!(audio[0].0.as_deref(), Some("block.aac."));
        assert_eq!(audio[1].2, 2);

        drop(outs);
    }
}
