//! Per-flow HTTP state
//!
//! One [`FlowState`] is attached to every flow carrying HTTP. It keeps an
//! independent [`HalfState`] for each direction plus a little state that
//! belongs to the flow as a whole:
//! - the method of the current request and status of the current response
//! - a single charset tracker, used for responses only
//! - the queue of pipelined requests waiting for their responses
//!
//! Message boundaries call [`FlowState::half_reset`], trailers call
//! [`FlowState::trailer_prep`]. Dropping the flow state releases
//! everything it owns.

pub mod attach;
pub mod pipeline;
pub mod registry;

pub use pipeline::TransactionPipeline;
pub use registry::{FlowData, FlowDataId, FlowDataRegistry};

use crate::anomaly::{Events, Infractions};
use crate::config::FlowConfig;
use crate::decode::{Charset, CompressionContext, MimeSession, UtfDecodeState};
use crate::enums::{
    ChunkState, CompressionMode, Direction, MethodId, PerDirection, SectionType, VersionId,
};
use crate::section::{SectionBuffer, Splitter};
use crate::telemetry::{next_instance_seq, LifecycleNotice, NoticeKind};
use crate::transaction::{Transaction, TransactionHandle};
use log::{debug, trace};
use std::any::Any;
use std::fmt::{self, Write};
use std::sync::OnceLock;

/// Bytes of body gathered into one section for detection
pub const DEFAULT_SECTION_TARGET: usize = 16_384;

/// Largest body section the splitter may produce
pub const MAX_SECTION_SIZE: usize = 65_535;

/// Initial capacity of an owned header-type section buffer
const HEADER_BUFFER_CAPACITY: usize = 1_024;

static HTTP_FLOW_ID: OnceLock<FlowDataId> = OnceLock::new();

/// State of one direction of a flow
pub struct HalfState {
    version_id: VersionId,
    data_length: Option<i64>,
    body_octets: Option<i64>,
    section_size_target: usize,
    section_size_max: usize,
    file_depth_remaining: Option<i64>,
    detect_depth_remaining: Option<i64>,
    compression: CompressionMode,
    compress_stream: Option<CompressionContext>,
    mime_state: Option<MimeSession>,
    chunk_state: ChunkState,
    chunk_expected_length: u64,
    section_offset: usize,
    infractions: Infractions,
    events: Events,
    transaction: Option<TransactionHandle>,
    type_expected: SectionType,
    section_type: SectionType,
    section_buffer: SectionBuffer,
    splitter: Option<Box<dyn Splitter>>,
    expected_trans_num: u64,
}

impl HalfState {
    fn new(type_expected: SectionType) -> Self {
        Self {
            version_id: VersionId::NotPresent,
            data_length: None,
            body_octets: None,
            section_size_target: 0,
            section_size_max: 0,
            file_depth_remaining: None,
            detect_depth_remaining: None,
            compression: CompressionMode::None,
            compress_stream: None,
            mime_state: None,
            chunk_state: ChunkState::AwaitingSize,
            chunk_expected_length: 0,
            section_offset: 0,
            infractions: Infractions::new(),
            events: Events::new(),
            transaction: None,
            type_expected,
            section_type: SectionType::None,
            section_buffer: SectionBuffer::Empty,
            splitter: None,
            expected_trans_num: 1,
        }
    }

    /// End and drop the inflate stream, if one is running
    fn release_compression(&mut self) {
        self.compression = CompressionMode::None;
        if let Some(stream) = self.compress_stream.take() {
            stream.end();
        }
    }

    pub fn version_id(&self) -> VersionId {
        self.version_id
    }

    pub fn data_length(&self) -> Option<i64> {
        self.data_length
    }

    pub fn body_octets(&self) -> Option<i64> {
        self.body_octets
    }

    pub fn section_size_target(&self) -> usize {
        self.section_size_target
    }

    pub fn section_size_max(&self) -> usize {
        self.section_size_max
    }

    pub fn file_depth_remaining(&self) -> Option<i64> {
        self.file_depth_remaining
    }

    pub fn detect_depth_remaining(&self) -> Option<i64> {
        self.detect_depth_remaining
    }

    pub fn compression(&self) -> CompressionMode {
        self.compression
    }

    pub fn has_compression_context(&self) -> bool {
        self.compress_stream.is_some()
    }

    pub fn has_mime_state(&self) -> bool {
        self.mime_state.is_some()
    }

    pub fn chunk_state(&self) -> ChunkState {
        self.chunk_state
    }

    pub fn chunk_expected_length(&self) -> u64 {
        self.chunk_expected_length
    }

    pub fn section_offset(&self) -> usize {
        self.section_offset
    }

    pub fn infractions(&self) -> &Infractions {
        &self.infractions
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.transaction.as_ref()
    }

    pub fn type_expected(&self) -> SectionType {
        self.type_expected
    }

    pub fn section_type(&self) -> SectionType {
        self.section_type
    }

    pub fn section_buffer(&self) -> &SectionBuffer {
        &self.section_buffer
    }

    pub fn has_splitter(&self) -> bool {
        self.splitter.is_some()
    }

    pub fn expected_trans_num(&self) -> u64 {
        self.expected_trans_num
    }
}

/// Framing of a message body, as learned from its headers
#[derive(Debug, Clone, Default)]
pub struct BodyFraming<'a> {
    /// Content-Length, `None` for chunked or close-delimited bodies
    pub data_length: Option<i64>,
    /// Content-Encoding
    pub compression: Option<CompressionMode>,
    /// Content-Type
    pub content_type: Option<&'a str>,
}

/// HTTP state of one flow
pub struct FlowState {
    half: PerDirection<HalfState>,
    method_id: MethodId,
    status_code: Option<u16>,
    /// Response side only
    utf_state: Option<UtfDecodeState>,
    pipeline: TransactionPipeline,
    config: FlowConfig,
    seq_num: u64,
}

impl FlowState {
    /// Registry id under which HTTP flow state is stored
    pub fn inspector_id() -> FlowDataId {
        *HTTP_FLOW_ID.get_or_init(FlowDataId::allocate)
    }

    pub fn new(config: &FlowConfig) -> Self {
        let seq_num = next_instance_seq();
        if config.lifecycle_notices {
            LifecycleNotice::new(NoticeKind::FlowDataConstruct, seq_num).emit();
        }
        debug!("[flow={}] HTTP flow state created", seq_num);

        Self {
            half: PerDirection::new(
                HalfState::new(SectionType::Request),
                HalfState::new(SectionType::Status),
            ),
            method_id: MethodId::NotPresent,
            status_code: None,
            utf_state: None,
            pipeline: TransactionPipeline::new(config.pipeline_depth),
            config: config.clone(),
            seq_num,
        }
    }

    /// Clear per-message state of one direction at a message boundary.
    ///
    /// Pipeline contents and the flow-level transaction counters survive.
    pub fn half_reset(&mut self, direction: Direction) {
        let half = &mut self.half[direction];

        half.version_id = VersionId::NotPresent;
        half.data_length = None;
        half.body_octets = None;
        half.section_size_target = 0;
        half.section_size_max = 0;
        half.file_depth_remaining = None;
        half.detect_depth_remaining = None;
        half.release_compression();
        half.mime_state = None;
        half.infractions.reset();
        half.events.reset();
        half.section_offset = 0;
        half.chunk_state = ChunkState::AwaitingSize;
        half.chunk_expected_length = 0;

        match direction {
            Direction::Client => {
                half.type_expected = SectionType::Request;
                half.expected_trans_num += 1;
                self.method_id = MethodId::NotPresent;
            }
            Direction::Server => {
                half.type_expected = SectionType::Status;
                let is_final = half
                    .transaction
                    .as_ref()
                    .is_some_and(|t| t.borrow().final_response());
                if is_final {
                    half.expected_trans_num += 1;
                }
                self.status_code = None;
                self.utf_state = None;
            }
        }

        trace!(
            "[flow={}] {} half reset, expecting transaction {}",
            self.seq_num,
            direction,
            self.half[direction].expected_trans_num
        );
    }

    /// Prepare one direction for a trailer section. Trailers are never
    /// compressed and do not change message framing.
    pub fn trailer_prep(&mut self, direction: Direction) {
        let half = &mut self.half[direction];
        half.type_expected = SectionType::Trailer;
        half.release_compression();
        half.infractions.reset();
        half.events.reset();
    }

    /// Queue a transaction whose response has not arrived yet.
    ///
    /// Returns false on overflow; the transaction is then not queued and
    /// must be paired without the pipeline.
    pub fn add_to_pipeline(&mut self, transaction: TransactionHandle) -> bool {
        let added = self.pipeline.add(transaction);
        if !added && self.config.lifecycle_notices {
            LifecycleNotice::new(NoticeKind::PipelineOverflow, self.seq_num)
                .with_queued(self.pipeline.len())
                .emit();
        }
        added
    }

    /// Oldest queued transaction, `None` when nothing is outstanding
    pub fn take_from_pipeline(&mut self) -> Option<TransactionHandle> {
        self.pipeline.take()
    }

    /// Give up on pipelined pairing for the rest of the flow
    pub fn mark_pipeline_underflow(&mut self) {
        if !self.pipeline.underflow() && self.config.lifecycle_notices {
            LifecycleNotice::new(NoticeKind::PipelineUnderflow, self.seq_num)
                .with_queued(self.pipeline.len())
                .emit();
        }
        self.pipeline.mark_underflow();
    }

    /// Set up body decoding once a message's headers are complete
    pub fn start_body(&mut self, direction: Direction, framing: &BodyFraming<'_>) {
        let detect_depth = self.config.detect_depth(direction).unwrap_or(i64::MAX);
        let file_depth = self.config.file_depth().unwrap_or(i64::MAX);

        let compression = match framing.compression.unwrap_or(CompressionMode::None) {
            CompressionMode::Gzip if self.config.decompress_gzip => CompressionMode::Gzip,
            CompressionMode::Deflate if self.config.decompress_deflate => CompressionMode::Deflate,
            _ => CompressionMode::None,
        };

        let half = &mut self.half[direction];
        half.data_length = framing.data_length;
        half.body_octets = Some(0);
        half.detect_depth_remaining = Some(detect_depth);
        half.file_depth_remaining = Some(file_depth);
        half.section_size_target = DEFAULT_SECTION_TARGET;
        half.section_size_max = MAX_SECTION_SIZE;
        half.chunk_state = ChunkState::AwaitingSize;
        half.chunk_expected_length = 0;

        half.release_compression();
        half.compression = compression;
        half.compress_stream = CompressionContext::new(compression);

        half.mime_state = framing.content_type.and_then(MimeSession::from_content_type);

        if direction == Direction::Server && self.config.normalize_utf {
            let charset = framing
                .content_type
                .map(Charset::from_content_type)
                .unwrap_or(Charset::Unknown);
            self.utf_state = Some(UtfDecodeState::new(charset));
        }
    }

    /// Account for body bytes handed on for inspection
    pub fn consume_body(&mut self, direction: Direction, octets: usize) {
        let half = &mut self.half[direction];
        half.section_offset = half.section_offset.saturating_add(octets);
        let octets = i64::try_from(octets).unwrap_or(i64::MAX);
        half.body_octets = Some(half.body_octets.unwrap_or(0).saturating_add(octets));
        if let Some(depth) = half.detect_depth_remaining.as_mut() {
            *depth = depth.saturating_sub(octets).max(0);
        }
        if let Some(depth) = half.file_depth_remaining.as_mut() {
            *depth = depth.saturating_sub(octets).max(0);
        }
    }

    /// Begin reassembling a new section, releasing the previous buffer
    pub fn start_section(&mut self, direction: Direction, section_type: SectionType) {
        let half = &mut self.half[direction];
        half.section_buffer.release();
        half.section_type = section_type;
        half.section_buffer = SectionBuffer::for_section(section_type, HEADER_BUFFER_CAPACITY);
    }

    /// Add bytes to the current section, returning how many were taken
    pub fn append_section(&mut self, direction: Direction, data: &[u8]) -> usize {
        self.half[direction].section_buffer.append(data)
    }

    /// Section handed off; drop its buffer
    pub fn finish_section(&mut self, direction: Direction) {
        let half = &mut self.half[direction];
        half.section_buffer.release();
        half.section_type = SectionType::None;
    }

    pub fn set_chunk_state(&mut self, direction: Direction, state: ChunkState, expected_length: u64) {
        let half = &mut self.half[direction];
        half.chunk_state = state;
        half.chunk_expected_length = expected_length;
    }

    /// Install the splitter for one direction, releasing any previous one
    pub fn install_splitter(&mut self, direction: Direction, splitter: Box<dyn Splitter>) {
        self.half[direction].splitter = Some(splitter);
    }

    pub fn release_splitter(&mut self, direction: Direction) -> bool {
        self.half[direction].splitter.take().is_some()
    }

    pub fn set_version(&mut self, direction: Direction, version: VersionId) {
        self.half[direction].version_id = version;
    }

    pub fn set_method(&mut self, method: MethodId) {
        self.method_id = method;
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.status_code = Some(code);
    }

    pub fn record_infraction(&mut self, direction: Direction, code: u32) {
        self.half[direction].infractions.insert(code);
    }

    pub fn record_event(&mut self, direction: Direction, code: u32) {
        self.half[direction].events.insert(code);
    }

    pub fn half(&self, direction: Direction) -> &HalfState {
        &self.half[direction]
    }

    pub fn method_id(&self) -> MethodId {
        self.method_id
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn pipeline(&self) -> &TransactionPipeline {
        &self.pipeline
    }

    pub fn compression_context_mut(
        &mut self,
        direction: Direction,
    ) -> Option<&mut CompressionContext> {
        self.half[direction].compress_stream.as_mut()
    }

    pub fn mime_state_mut(&mut self, direction: Direction) -> Option<&mut MimeSession> {
        self.half[direction].mime_state.as_mut()
    }

    pub fn utf_state(&self) -> Option<&UtfDecodeState> {
        self.utf_state.as_ref()
    }

    pub fn utf_state_mut(&mut self) -> Option<&mut UtfDecodeState> {
        self.utf_state.as_mut()
    }

    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    /// Write the diagnostic report used by regression tests
    pub fn show(&self, out: &mut impl Write) -> fmt::Result {
        let c = &self.half.client;
        let s = &self.half.server;

        writeln!(out, "Diagnostic output from HttpFlowData (Client/Server):")?;
        writeln!(out, "Version ID: {}/{}", c.version_id, s.version_id)?;
        writeln!(out, "Method ID: {}", self.method_id)?;
        writeln!(out, "Status code: {}", Stat(self.status_code.map(i64::from)))?;
        writeln!(out, "Type expected: {}/{}", c.type_expected, s.type_expected)?;
        writeln!(out, "Data length: {}/{}", Stat(c.data_length), Stat(s.data_length))?;
        writeln!(
            out,
            "Detect depth remaining: {}/{}",
            Stat(c.detect_depth_remaining),
            Stat(s.detect_depth_remaining)
        )?;
        writeln!(
            out,
            "File depth remaining: {}/{}",
            Stat(c.file_depth_remaining),
            Stat(s.file_depth_remaining)
        )?;
        writeln!(out, "Body octets: {}/{}", Stat(c.body_octets), Stat(s.body_octets))?;
        writeln!(
            out,
            "Pipelining: front {} back {} overflow {} underflow {}",
            self.pipeline.front(),
            self.pipeline.back(),
            u8::from(self.pipeline.overflow()),
            u8::from(self.pipeline.underflow())
        )?;
        writeln!(
            out,
            "Cutter: {}/{}",
            presence(c.splitter.is_some()),
            presence(s.splitter.is_some())
        )?;
        writeln!(out, "utf_state: {}", presence(self.utf_state.is_some()))?;
        writeln!(
            out,
            "mime_state: {}/{}",
            presence(c.mime_state.is_some()),
            presence(s.mime_state.is_some())
        )
    }
}

/// Counter that may be absent
struct Stat(Option<i64>);

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => f.write_str("-"),
        }
    }
}

fn presence(present: bool) -> &'static str {
    if present {
        "Present"
    } else {
        "nullptr"
    }
}

impl Drop for FlowState {
    fn drop(&mut self) {
        if self.config.test_output {
            let mut report = String::new();
            if self.show(&mut report).is_ok() {
                debug!("[flow={}]\n{}", self.seq_num, report);
            }
        }

        for direction in Direction::BOTH {
            let half = &mut self.half[direction];
            half.section_buffer.release();
            Transaction::delete_transaction(half.transaction.take());
            half.splitter = None;
            half.release_compression();
            half.mime_state = None;
        }
        self.utf_state = None;

        let drained = self.pipeline.clear();
        debug!(
            "[flow={}] HTTP flow state destroyed, {} pipelined transaction(s) dropped",
            self.seq_num, drained
        );

        if self.config.lifecycle_notices {
            LifecycleNotice::new(NoticeKind::FlowDataDestruct, self.seq_num).emit();
        }
    }
}

impl FlowData for FlowState {
    fn flow_data_id(&self) -> FlowDataId {
        Self::inspector_id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl fmt::Debug for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowState")
            .field("seq_num", &self.seq_num)
            .field("method_id", &self.method_id)
            .field("status_code", &self.status_code)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SplitResult;
    use std::cell::Cell;
    use std::rc::Rc;

    fn flow() -> FlowState {
        FlowState::new(&FlowConfig::default())
    }

    struct CountingSplitter {
        dropped: Rc<Cell<u32>>,
    }

    impl Splitter for CountingSplitter {
        fn scan(&mut self, _data: &[u8]) -> SplitResult {
            SplitResult::Search
        }

        fn section_type(&self) -> SectionType {
            SectionType::Header
        }
    }

    impl Drop for CountingSplitter {
        fn drop(&mut self) {
            self.dropped.set(self.dropped.get() + 1);
        }
    }

    fn gzip_body() -> BodyFraming<'static> {
        BodyFraming {
            data_length: Some(100),
            compression: Some(CompressionMode::Gzip),
            content_type: Some("multipart/form-data; boundary=b1"),
        }
    }

    #[test]
    fn test_initial_state() {
        let flow = flow();
        assert_eq!(flow.half(Direction::Client).type_expected(), SectionType::Request);
        assert_eq!(flow.half(Direction::Server).type_expected(), SectionType::Status);
        assert_eq!(flow.half(Direction::Client).expected_trans_num(), 1);
        assert_eq!(flow.half(Direction::Server).expected_trans_num(), 1);
        assert!(flow.utf_state().is_none());
        assert!(!flow.pipeline().is_allocated());
    }

    #[test]
    fn test_client_half_reset() {
        let mut flow = flow();
        flow.set_method(MethodId::Post);
        flow.set_version(Direction::Client, VersionId::Http11);
        flow.start_body(Direction::Client, &gzip_body());
        flow.record_infraction(Direction::Client, 5);
        flow.record_event(Direction::Client, 2);
        flow.trailer_prep(Direction::Client);

        for round in 1..=3 {
            flow.half_reset(Direction::Client);

            let half = flow.half(Direction::Client);
            assert_eq!(half.type_expected(), SectionType::Request);
            assert_eq!(half.expected_trans_num(), 1 + round);
            assert_eq!(half.version_id(), VersionId::NotPresent);
            assert_eq!(half.data_length(), None);
            assert_eq!(half.body_octets(), None);
            assert_eq!(half.detect_depth_remaining(), None);
            assert_eq!(half.section_size_target(), 0);
            assert_eq!(half.compression(), CompressionMode::None);
            assert!(!half.has_compression_context());
            assert!(!half.has_mime_state());
            assert!(half.infractions().is_empty());
            assert!(half.events().is_empty());
            assert_eq!(half.chunk_state(), ChunkState::AwaitingSize);
            assert_eq!(flow.method_id(), MethodId::NotPresent);
        }
    }

    #[test]
    fn test_client_reset_leaves_server_alone() {
        let mut flow = flow();
        flow.start_body(Direction::Server, &gzip_body());
        flow.set_status_code(200);

        flow.half_reset(Direction::Client);

        assert!(flow.half(Direction::Server).has_compression_context());
        assert!(flow.utf_state().is_some());
        assert_eq!(flow.status_code(), Some(200));
        assert_eq!(flow.half(Direction::Server).expected_trans_num(), 1);
    }

    #[test]
    fn test_server_reset_counts_final_responses_only() {
        let mut flow = flow();
        let tx = Transaction::new_handle(1);
        flow.half[Direction::Server].transaction = Some(Rc::clone(&tx));

        // 100 Continue
        flow.set_status_code(100);
        flow.half_reset(Direction::Server);
        assert_eq!(flow.half(Direction::Server).expected_trans_num(), 1);
        assert_eq!(flow.half(Direction::Server).type_expected(), SectionType::Status);
        assert_eq!(flow.status_code(), None);

        tx.borrow_mut().set_final_response(true);
        flow.half_reset(Direction::Server);
        assert_eq!(flow.half(Direction::Server).expected_trans_num(), 2);
    }

    #[test]
    fn test_server_reset_without_transaction() {
        let mut flow = flow();
        flow.half_reset(Direction::Server);
        assert_eq!(flow.half(Direction::Server).expected_trans_num(), 1);
    }

    #[test]
    fn test_server_reset_releases_utf_state() {
        let mut flow = flow();
        flow.start_body(
            Direction::Server,
            &BodyFraming {
                content_type: Some("text/html; charset=utf-8"),
                ..Default::default()
            },
        );
        assert_eq!(flow.utf_state().map(|u| u.charset()), Some(Charset::Utf8));

        flow.half_reset(Direction::Server);
        assert!(flow.utf_state().is_none());
    }

    #[test]
    fn test_request_body_never_gets_utf_state() {
        let mut flow = flow();
        flow.start_body(
            Direction::Client,
            &BodyFraming {
                content_type: Some("text/plain; charset=utf-8"),
                ..Default::default()
            },
        );
        assert!(flow.utf_state().is_none());
    }

    #[test]
    fn test_trailer_prep() {
        let mut flow = flow();
        flow.set_version(Direction::Server, VersionId::Http11);
        flow.start_body(Direction::Server, &gzip_body());
        flow.consume_body(Direction::Server, 40);
        flow.record_infraction(Direction::Server, 9);

        flow.trailer_prep(Direction::Server);

        let half = flow.half(Direction::Server);
        assert_eq!(half.type_expected(), SectionType::Trailer);
        assert_eq!(half.compression(), CompressionMode::None);
        assert!(!half.has_compression_context());
        assert!(half.infractions().is_empty());
        // Framing untouched
        assert_eq!(half.version_id(), VersionId::Http11);
        assert_eq!(half.data_length(), Some(100));
        assert_eq!(half.body_octets(), Some(40));
        assert!(half.has_mime_state());
    }

    #[test]
    fn test_start_body_respects_config() {
        let config = FlowConfig {
            decompress_gzip: false,
            response_depth: 50,
            ..Default::default()
        };
        let mut flow = FlowState::new(&config);
        flow.start_body(Direction::Server, &gzip_body());

        let half = flow.half(Direction::Server);
        assert_eq!(half.compression(), CompressionMode::None);
        assert!(!half.has_compression_context());
        assert_eq!(half.detect_depth_remaining(), Some(50));
        assert_eq!(half.section_size_max(), MAX_SECTION_SIZE);

        flow.consume_body(Direction::Server, 80);
        let half = flow.half(Direction::Server);
        assert_eq!(half.detect_depth_remaining(), Some(0));
        assert_eq!(half.body_octets(), Some(80));
        assert_eq!(half.file_depth_remaining(), Some(i64::MAX - 80));
    }

    #[test]
    fn test_gzip_response_body_inflates() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write as _;

        let body = b"compressed response payload";
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(body).unwrap();
        let compressed = enc.finish().unwrap();

        let mut flow = flow();
        flow.start_body(Direction::Server, &gzip_body());
        let ctx = flow.compression_context_mut(Direction::Server).unwrap();

        let mut out = [0u8; 128];
        let step = ctx.decompress(&compressed, &mut out).unwrap();
        assert!(step.stream_end);
        assert_eq!(&out[..step.produced], body);
    }

    #[test]
    fn test_restarting_body_replaces_context() {
        let mut flow = flow();
        flow.start_body(Direction::Client, &gzip_body());
        flow.start_body(
            Direction::Client,
            &BodyFraming {
                compression: Some(CompressionMode::Deflate),
                ..Default::default()
            },
        );
        let half = flow.half(Direction::Client);
        assert_eq!(half.compression(), CompressionMode::Deflate);
        assert!(flow.half[Direction::Client]
            .compress_stream
            .as_ref()
            .is_some_and(|c| c.mode() == CompressionMode::Deflate));
        assert!(!flow.half(Direction::Client).has_mime_state());
    }

    #[test]
    fn test_section_buffers() {
        let mut flow = flow();
        flow.start_section(Direction::Client, SectionType::Header);
        flow.append_section(Direction::Client, b"Host: example\r\n");
        assert!(flow.half(Direction::Client).section_buffer().is_owned());
        assert_eq!(flow.half(Direction::Client).section_buffer().len(), 15);

        flow.start_section(Direction::Client, SectionType::BodyCl);
        assert!(flow.half(Direction::Client).section_buffer().is_shared());
        assert_eq!(flow.half(Direction::Client).section_type(), SectionType::BodyCl);

        flow.finish_section(Direction::Client);
        assert!(matches!(
            flow.half(Direction::Client).section_buffer(),
            SectionBuffer::Empty
        ));
    }

    #[test]
    fn test_body_sections_do_not_accumulate_across_flows() {
        for _ in 0..3 {
            let mut earlier = flow();
            earlier.start_section(Direction::Server, SectionType::BodyCl);
            assert_eq!(earlier.append_section(Direction::Server, &[b'a'; 40_000]), 40_000);
            earlier.finish_section(Direction::Server);
        }

        let mut fresh = flow();
        fresh.start_section(Direction::Server, SectionType::BodyCl);
        assert_eq!(fresh.half(Direction::Server).section_buffer().len(), 0);
        assert_eq!(crate::section::with_body_buffer(|b| b.len()), 0);
    }

    #[test]
    fn test_body_octets_saturate() {
        let mut flow = flow();
        flow.consume_body(Direction::Client, usize::MAX);
        flow.consume_body(Direction::Client, 10);
        assert_eq!(flow.half(Direction::Client).body_octets(), Some(i64::MAX));
    }

    #[test]
    fn test_pipeline_through_flow() {
        let config = FlowConfig {
            pipeline_depth: 4,
            ..Default::default()
        };
        let mut flow = FlowState::new(&config);

        assert!(flow.add_to_pipeline(Transaction::new_handle(1)));
        assert!(flow.add_to_pipeline(Transaction::new_handle(2)));
        assert!(flow.add_to_pipeline(Transaction::new_handle(3)));
        assert!(!flow.add_to_pipeline(Transaction::new_handle(4)));
        assert!(flow.pipeline().overflow());

        let first = flow.take_from_pipeline().map(|t| t.borrow().trans_num());
        assert_eq!(first, Some(1));
        assert!(flow.pipeline().overflow());
    }

    #[test]
    fn test_teardown_releases_everything() {
        let splitters_dropped = Rc::new(Cell::new(0));
        let owned = Transaction::new_handle(1);
        let queued = Transaction::new_handle(2);
        let weak = [Rc::downgrade(&owned), Rc::downgrade(&queued)];

        {
            let mut flow = flow();
            for direction in Direction::BOTH {
                flow.install_splitter(
                    direction,
                    Box::new(CountingSplitter {
                        dropped: Rc::clone(&splitters_dropped),
                    }),
                );
                flow.start_body(direction, &gzip_body());
                flow.start_section(direction, SectionType::Header);
            }
            flow.half[Direction::Client].transaction = Some(owned);
            assert!(flow.add_to_pipeline(queued));
            assert!(flow.utf_state().is_some());
        }

        assert_eq!(splitters_dropped.get(), 2);
        assert!(weak.iter().all(|w| w.upgrade().is_none()));
    }

    #[test]
    fn test_splitter_replaced_once() {
        let dropped = Rc::new(Cell::new(0));
        let mut flow = flow();
        flow.install_splitter(
            Direction::Client,
            Box::new(CountingSplitter {
                dropped: Rc::clone(&dropped),
            }),
        );
        flow.install_splitter(
            Direction::Client,
            Box::new(CountingSplitter {
                dropped: Rc::clone(&dropped),
            }),
        );
        assert_eq!(dropped.get(), 1);

        assert!(flow.release_splitter(Direction::Client));
        assert!(!flow.release_splitter(Direction::Client));
        drop(flow);
        assert_eq!(dropped.get(), 2);
    }

    #[test]
    fn test_show_format() {
        let mut flow = flow();
        flow.set_version(Direction::Client, VersionId::Http11);
        flow.set_method(MethodId::Get);
        flow.start_body(
            Direction::Server,
            &BodyFraming {
                data_length: Some(10),
                ..Default::default()
            },
        );

        let mut report = String::new();
        flow.show(&mut report).unwrap();

        let expected = "\
Diagnostic output from HttpFlowData (Client/Server):
Version ID: 1.1/-
Method ID: GET
Status code: -
Type expected: Request/Status
Data length: -/10
Detect depth remaining: -/9223372036854775807
File depth remaining: -/9223372036854775807
Body octets: -/0
Pipelining: front 0 back 0 overflow 0 underflow 0
Cutter: nullptr/nullptr
utf_state: Present
mime_state: nullptr/nullptr
";
        assert_eq!(report, expected);
    }

    #[test]
    fn test_registry_slot() {
        let mut registry = FlowDataRegistry::new();
        let id = FlowState::inspector_id();
        let config = FlowConfig::default();

        let seq = registry
            .get_or_insert_with(id, || FlowState::new(&config))
            .map(|flow| flow.seq_num());
        let again = registry
            .get_or_insert_with(id, || FlowState::new(&config))
            .map(|flow| flow.seq_num());
        assert!(seq.is_some());
        assert_eq!(seq, again);

        let tx = Transaction::new_handle(1);
        let weak = Rc::downgrade(&tx);
        if let Some(flow) = registry.get_mut::<FlowState>(id) {
            assert!(flow.add_to_pipeline(tx));
        }

        assert!(registry.free(id));
        assert!(weak.upgrade().is_none());
    }
}
