//! The complete recording pipeline, from BLE-MIDI packets to segmented Standard Midi Files.
//!
//! ```text
//! packet -> PacketDecoder -> Reassembler -+
//!                                         +-> MidiFilter -> GapDetector, Observer, SmfEncoder
//! message -> HostClock ------------------+
//! ```

use crate::{
    filter::{FilterConfig, MidiFilter},
    gap::{Gap, GapConfig, GapDetector},
    packet::{DecoderConfig, PacketDecoder},
    prelude::*,
    reassemble::Reassembler,
    smf::{meta, SmfEncoder},
    timer::{Scheduler, TimerKind, TimerToken},
    timestamp::HostClock,
};

/// Settings for a whole recording pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RecorderConfig {
    /// Packet decoder settings.
    pub decoder: DecoderConfig,
    /// Which messages to leave out of the recording.
    pub filter: FilterConfig,
    /// What counts as a gap.
    pub gap: GapConfig,
    /// Whether to start a new file on every gap.
    pub split_on_gap: bool,
    /// Text written as a text meta event at the start of every file.
    pub description: Option<String>,
}
impl Default for RecorderConfig {
    fn default() -> RecorderConfig {
        RecorderConfig {
            decoder: DecoderConfig::default(),
            filter: FilterConfig::default(),
            gap: GapConfig::default(),
            split_on_gap: true,
            description: None,
        }
    }
}

/// Receives the events of a recording as they happen.
///
/// Every method has a default implementation that only logs.
pub trait Observer {
    /// A message passed the filter and is about to be recorded.
    fn message(&mut self, delta: u32, msg: &[u8]) {
        debug!(delta, ?msg, "recording message");
    }

    /// A gap was detected.
    ///
    /// If the recorder splits on gaps, `segment` holds the file that the gap just completed.
    fn gap(&mut self, gap: Gap, segment: Option<&[u8]>) {
        info!(?gap, segment_len = segment.map(|s| s.len()), "gap");
    }
}

/// An observer that only logs.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogObserver;
impl Observer for LogObserver {}

/// The SMF side of the pipeline: the encoder and the finished files.
#[derive(Clone, Debug)]
struct Segmenter {
    encoder: SmfEncoder,
    /// Whether the current segment holds any message.
    dirty: bool,
    segments: Vec<Vec<u8>>,
    split_on_gap: bool,
    description: Option<String>,
}
impl Segmenter {
    /// Start a new, empty segment.
    fn begin(&mut self) {
        self.encoder.initialize();
        self.dirty = false;
        if let Some(description) = &self.description {
            self.encoder.meta_text(0, meta::TEXT, description);
        }
    }

    fn record(&mut self, delta: u32, msg: &[u8]) {
        self.encoder.encode(delta, msg);
        self.dirty = true;
    }

    fn cut(&mut self) -> &[u8] {
        let segment = self.encoder.build();
        info!(
            index = self.segments.len(),
            len = segment.len(),
            "segment complete"
        );
        self.segments.push(segment);
        self.begin();
        match self.segments.last() {
            Some(segment) => segment,
            None => &[],
        }
    }

    fn gap(&mut self, gap: Gap, observer: &mut impl Observer) {
        if self.split_on_gap {
            let segment = self.cut();
            observer.gap(gap, Some(segment));
        } else {
            observer.gap(gap, None);
        }
    }
}

/// The stages after the filter, shared by both inputs.
#[derive(Clone, Debug)]
struct Sink<O> {
    gaps: GapDetector,
    observer: O,
    segmenter: Segmenter,
}
impl<O: Observer> Sink<O> {
    fn accept(&mut self, delta: u32, msg: &[u8], timers: &mut dyn Scheduler) {
        let Sink {
            gaps,
            observer,
            segmenter,
        } = self;
        //A gap cuts the segment before the message that revealed it
        gaps.detect(delta, msg, timers, |gap| segmenter.gap(gap, &mut *observer));
        observer.message(delta, msg);
        segmenter.record(delta, msg);
    }
}

/// Records BLE-MIDI packets or plain MIDI messages into Standard Midi Files, optionally cutting
/// a new file on every gap.
///
/// Timers requested by the pipeline are armed on the `Scheduler` passed to every call, and must
/// be handed back through [`fire`](#method.fire) when they expire.
///
/// ```rust
/// use bletrack::{timer::VirtualClock, Recorder, RecorderConfig};
///
/// let mut config = RecorderConfig::default();
/// config.decoder.wait_until_stable = false;
/// let mut recorder = Recorder::new(config);
/// let mut clock = VirtualClock::new();
/// recorder.start(&mut clock);
///
/// // Note on, then note off 100ms later
/// recorder.push_packet(1000.0, &[0x80, 0x80, 0x90, 60, 100], &mut clock);
/// recorder.push_packet(1100.0, &[0x80, 0x80 | 100, 0x80, 60, 0], &mut clock);
///
/// let file = recorder.build();
/// assert_eq!(&file[..4], b"MThd");
/// ```
#[derive(Clone, Debug)]
pub struct Recorder<O = LogObserver> {
    decoder: PacketDecoder,
    reassembler: Reassembler,
    filter: MidiFilter,
    host_clock: HostClock,
    sink: Sink<O>,
}
impl Recorder<LogObserver> {
    /// Create a recorder that logs its progress.
    pub fn new(config: RecorderConfig) -> Recorder<LogObserver> {
        Recorder::with_observer(config, LogObserver)
    }
}
impl<O: Observer> Recorder<O> {
    /// Create a recorder that reports its progress to `observer`.
    pub fn with_observer(config: RecorderConfig, observer: O) -> Recorder<O> {
        let mut segmenter = Segmenter {
            encoder: SmfEncoder::new(),
            dirty: false,
            segments: Vec::new(),
            split_on_gap: config.split_on_gap,
            description: config.description,
        };
        segmenter.begin();
        Recorder {
            decoder: PacketDecoder::new(config.decoder),
            reassembler: Reassembler::new(),
            filter: MidiFilter::new(&config.filter),
            host_clock: HostClock::new(),
            sink: Sink {
                gaps: GapDetector::new(config.gap),
                observer,
                segmenter,
            },
        }
    }

    /// Reset every stage and start a new recording.
    ///
    /// Finished segments that were not taken yet are kept.
    pub fn start(&mut self, timers: &mut dyn Scheduler) {
        info!("starting recording");
        self.decoder.initialize(timers);
        self.reassembler.initialize();
        self.filter.initialize();
        self.host_clock.initialize();
        self.sink.gaps.initialize();
        self.sink.segmenter.begin();
    }

    /// Feed a BLE-MIDI packet received at `host_ms`.
    pub fn push_packet(&mut self, host_ms: f64, raw: &[u8], timers: &mut dyn Scheduler) {
        let Recorder {
            decoder,
            reassembler,
            filter,
            sink,
            ..
        } = self;
        decoder.decode(host_ms, raw, |fragment| {
            trace!(
                delta = fragment.delta,
                bytes = ?fragment.bytes,
                sysex_continues = fragment.sysex_continues,
                "decoded fragment"
            );
            reassembler.reassemble(fragment.delta, fragment.bytes, |delta, msg| {
                filter.filter(delta, msg, |delta, msg| sink.accept(delta, msg, &mut *timers));
            });
        });
    }

    /// Feed a complete MIDI message received at `host_ms`, bypassing BLE-MIDI decoding.
    pub fn push_message(&mut self, host_ms: f64, msg: &[u8], timers: &mut dyn Scheduler) {
        let delta = self.host_clock.delta(host_ms);
        let Recorder { filter, sink, .. } = self;
        filter.filter(delta, msg, |delta, msg| sink.accept(delta, msg, timers));
    }

    /// Handle an expired timer.
    pub fn fire(&mut self, token: TimerToken) {
        match token.kind() {
            TimerKind::Stabilization => self.decoder.fire(token),
            TimerKind::Gap => {
                let Sink {
                    gaps,
                    observer,
                    segmenter,
                } = &mut self.sink;
                gaps.fire(token, |gap| segmenter.gap(gap, &mut *observer));
            }
        }
    }

    /// Build the segment being recorded.
    #[inline]
    pub fn build(&self) -> Vec<u8> {
        self.sink.segmenter.encoder.build()
    }

    /// Take the segments completed so far.
    #[inline]
    pub fn take_segments(&mut self) -> Vec<Vec<u8>> {
        mem::take(&mut self.sink.segmenter.segments)
    }

    /// Complete the current segment if it holds any message, and take every completed segment.
    pub fn finish(&mut self) -> Vec<Vec<u8>> {
        if self.sink.segmenter.dirty {
            self.sink.segmenter.cut();
        }
        self.take_segments()
    }

    /// The packet decoder, to tweak stabilization.
    #[inline]
    pub fn decoder_mut(&mut self) -> &mut PacketDecoder {
        &mut self.decoder
    }

    /// The gap detector state.
    #[inline]
    pub fn gap_detector(&self) -> &GapDetector {
        &self.sink.gaps
    }

    /// The observer.
    #[inline]
    pub fn observer(&self) -> &O {
        &self.sink.observer
    }

    /// The observer, mutably.
    #[inline]
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.sink.observer
    }

    /// Stop recording and get the observer back.
    #[inline]
    pub fn into_observer(self) -> O {
        self.sink.observer
    }
}
