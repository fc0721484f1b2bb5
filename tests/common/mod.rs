/// Shared code for our test harness.


use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use anyhow::{bail, Result};
use lazy_static::lazy_static;
use dash_manifest::clock::TimeSource;
use dash_manifest::manifest::{CodecSupport, Manifest, ManifestOptions, Tristate};
use dash_manifest::mpd::{parse_mpd, ParseOptions, ParseStatus, ParsedResult};
use dash_manifest::segment::{DashIndexBuilder, IndexContext, LastPosition, SegmentIndex, SegmentIndexBuilder};
use dash_manifest::ManifestWarning;


lazy_static! {
    static ref TRACING_INIT: Once = Once::new();
}

pub fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, fmt::time::LocalTime, prelude::*};
    use time::macros::format_description;

    TRACING_INIT.call_once(|| {
        let timer = LocalTime::new(format_description!("[hour]:[minute]:[second]"));
        let fmt_layer = fmt::layer()
            .compact()
            .with_timer(timer)
            .with_target(false)
            .with_test_writer();
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .expect("initializing logging");
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}


/// A clock which doesn't move unless told to.
#[derive(Debug)]
pub struct FixedTime {
    now: Mutex<(f64, f64)>,
}

impl FixedTime {
    pub fn new(monotonic_ms: f64, wall_clock_ms: f64) -> Arc<FixedTime> {
        Arc::new(FixedTime { now: Mutex::new((monotonic_ms, wall_clock_ms)) })
    }

    pub fn advance(&self, ms: f64) {
        let mut now = self.now.lock().unwrap();
        now.0 += ms;
        now.1 += ms;
    }
}

impl TimeSource for FixedTime {
    fn monotonic_ms(&self) -> f64 {
        self.now.lock().unwrap().0
    }

    fn wall_clock_ms(&self) -> f64 {
        self.now.lock().unwrap().1
    }
}


/// Builds the usual indexes, recording the id of each Representation it was called for and the
/// time at which its document was received.
#[derive(Debug, Default)]
pub struct RecordingIndexBuilder {
    pub built: Mutex<Vec<String>>,
    pub received_times: Mutex<Vec<(String, Option<f64>)>>,
}

impl SegmentIndexBuilder for RecordingIndexBuilder {
    fn build(&self, context: &IndexContext<'_>) -> Box<dyn SegmentIndex> {
        self.built.lock().unwrap().push(context.representation_id.to_string());
        self.received_times.lock().unwrap().push((context.representation_id.to_string(), context.received_time));
        DashIndexBuilder.build(context)
    }
}


/// Counts the `update` and `replace` calls received by the indexes it builds.
#[derive(Debug, Default)]
pub struct CountingIndexBuilder {
    pub updates: Arc<AtomicUsize>,
    pub replaces: Arc<AtomicUsize>,
}

impl CountingIndexBuilder {
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn replaces(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }
}

impl SegmentIndexBuilder for CountingIndexBuilder {
    fn build(&self, context: &IndexContext<'_>) -> Box<dyn SegmentIndex> {
        Box::new(CountingIndex {
            inner: DashIndexBuilder.build(context),
            updates: self.updates.clone(),
            replaces: self.replaces.clone(),
        })
    }
}

#[derive(Debug)]
pub struct CountingIndex {
    inner: Box<dyn SegmentIndex>,
    updates: Arc<AtomicUsize>,
    replaces: Arc<AtomicUsize>,
}

impl CountingIndex {
    fn inner_of<'a>(newer: &'a dyn SegmentIndex) -> &'a dyn SegmentIndex {
        match newer.as_any().downcast_ref::<CountingIndex>() {
            Some(counting) => counting.inner.as_ref(),
            None => newer,
        }
    }
}

impl SegmentIndex for CountingIndex {
    fn last_available_position(&self) -> LastPosition {
        self.inner.last_available_position()
    }

    fn first_available_position(&self) -> LastPosition {
        self.inner.first_available_position()
    }

    fn update(&mut self, newer: &dyn SegmentIndex) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(CountingIndex::inner_of(newer));
    }

    fn replace(&mut self, newer: &dyn SegmentIndex) {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        self.inner.replace(CountingIndex::inner_of(newer));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}


/// Codec support answering from fixed lists of codec prefixes. Anything not listed is unsupported.
#[derive(Debug, Default)]
pub struct ScriptedCodecSupport {
    pub supported: Vec<&'static str>,
    pub unknown: Vec<&'static str>,
}

impl ScriptedCodecSupport {
    pub fn supporting(supported: &[&'static str]) -> Arc<ScriptedCodecSupport> {
        Arc::new(ScriptedCodecSupport { supported: supported.to_vec(), unknown: Vec::new() })
    }
}

impl CodecSupport for ScriptedCodecSupport {
    fn is_supported(&self, _mime_type: &str, codec: &str, _encrypted: bool) -> Tristate {
        if self.supported.iter().any(|c| codec.starts_with(c)) {
            Tristate::Supported
        } else if self.unknown.iter().any(|c| codec.starts_with(c)) {
            Tristate::Unknown
        } else {
            Tristate::Unsupported
        }
    }
}


/// Parse a document which shouldn't need any external resource.
pub fn parse_done(xml: &str, options: ParseOptions) -> Result<ParsedResult> {
    let mpd = dash_manifest::parse(xml)?;
    match parse_mpd(mpd, options)? {
        ParseStatus::Done(result) => Ok(result),
        ParseStatus::NeedsClock(req) => bail!("unexpected clock request for {}", req.url()),
        ParseStatus::NeedsXlinks(req) => bail!("unexpected XLink request for {:?}", req.urls()),
    }
}

/// Parse a document and build the manifest model from it, with every common codec supported.
pub fn build_manifest(xml: &str, options: ParseOptions) -> Result<(Manifest, Vec<ManifestWarning>)> {
    let result = parse_done(xml, options)?;
    let codecs = ScriptedCodecSupport::supporting(&["avc1", "hvc1", "mp4a", "ec-3", "wvtt", "stpp"]);
    let (manifest, mut warnings) = Manifest::from_parsed(result.manifest, ManifestOptions::new().with_codec_support(codecs))?;
    warnings.splice(0..0, result.warnings);
    Ok((manifest, warnings))
}
