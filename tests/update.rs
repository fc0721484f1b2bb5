// Tests for merging refreshed manifests into an existing model.
//
// To run only these tests while enabling printing to stdout/stderr
//
//    cargo test --test update -- --show-output

pub mod common;
use std::sync::Arc;
use anyhow::Result;
use pretty_assertions::assert_eq;
use dash_manifest::manifest::{Manifest, ManifestOptions};
use dash_manifest::mpd::ParseOptions;
use dash_manifest::parsed::ParsedManifest;
use dash_manifest::{ManifestError, ManifestWarning};
use common::{parse_done, setup_logging, CountingIndexBuilder, FixedTime, ScriptedCodecSupport};


fn video_set(id: &str, reps: &[&str]) -> String {
    let mut xml = format!(r#"<AdaptationSet id="{id}" contentType="video" mimeType="video/mp4" codecs="avc1.64001F">
                               <SegmentTemplate timescale="1000" duration="2000" media="$RepresentationID$/$Number$.m4s"/>"#);
    // "v3" is announced at 300kbps
    for rep in reps {
        let bandwidth = rep[1..].parse::<u64>().unwrap_or(1) * 100_000;
        xml += &format!(r#"<Representation id="{rep}" bandwidth="{bandwidth}"/>"#);
    }
    xml + "</AdaptationSet>"
}

fn audio_set(id: &str) -> String {
    format!(r#"<AdaptationSet id="{id}" contentType="audio" mimeType="audio/mp4" codecs="mp4a.40.2" lang="en">
                 <SegmentTemplate timescale="1000" duration="2000" media="$RepresentationID$/$Number$.m4s"/>
                 <Representation id="{id}-1" bandwidth="64000"/>
               </AdaptationSet>"#)
}

// Static document made of consecutive 10 second Periods
fn static_mpd(periods: &[(&str, f64, String)]) -> String {
    let end = periods.last().map_or(0.0, |(_, start, _)| start + 10.0);
    let mut xml = format!(r#"<MPD type="static" mediaPresentationDuration="PT{end}S">"#);
    for (id, start, content) in periods {
        xml += &format!(r#"<Period id="{id}" start="PT{start}S" duration="PT10S">{content}</Period>"#);
    }
    xml + "</MPD>"
}

fn parsed(xml: &str, builder: &Arc<CountingIndexBuilder>) -> Result<ParsedManifest> {
    let options = ParseOptions::new().with_index_builder(builder.clone());
    Ok(parse_done(xml, options)?.manifest)
}

fn model(parsed: ParsedManifest) -> Result<Manifest> {
    let options = ManifestOptions::new().with_codec_support(ScriptedCodecSupport::supporting(&["avc1", "mp4a"]));
    Ok(Manifest::from_parsed(parsed, options)?.0)
}

fn period_ids(manifest: &Manifest) -> Vec<&str> {
    manifest.periods.iter().map(|p| p.id.as_str()).collect()
}


#[test]
fn test_identical_partial_update() -> Result<()> {
    setup_logging();
    let builder = Arc::new(CountingIndexBuilder::default());
    let xml = static_mpd(&[("p0", 0.0, video_set("v", &["v1", "v2"]))]);
    let mut manifest = model(parsed(&xml, &builder)?)?;
    let update = manifest.update(parsed(&xml, &builder)?)?;
    assert!(!update.periods.has_structural_changes());
    assert!(update.warnings.is_empty());
    assert_eq!(update.periods.updated_periods.len(), 1);
    let tracks = &update.periods.updated_periods[0].result.updated_tracks;
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].updated_representations.len(), 2);
    assert_eq!(builder.updates(), 2);
    assert_eq!(builder.replaces(), 0);
    Ok(())
}

#[test]
fn test_removed_representation() -> Result<()> {
    let builder = Arc::new(CountingIndexBuilder::default());
    let before = static_mpd(&[("p0", 0.0, video_set("v", &["v1", "v2", "v3"]))]);
    let after = static_mpd(&[("p0", 0.0, video_set("v", &["v1", "v3"]))]);
    let mut manifest = model(parsed(&before, &builder)?)?;
    let update = manifest.update(parsed(&after, &builder)?)?;

    let track = &update.periods.updated_periods[0].result.updated_tracks[0];
    assert_eq!(track.removed_representations, vec![String::from("v2")]);
    assert!(track.added_representations.is_empty());
    assert_eq!(builder.updates(), 2);
    assert_eq!(update.warnings, vec![ManifestWarning::RemovedRepresentation {
        track_id: String::from("v"),
        representation_id: String::from("v2"),
    }]);
    assert!(update.periods.has_structural_changes());
    let ids: Vec<&str> = manifest.periods[0].video[0].representations.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["v1", "v3"]);
    Ok(())
}

#[test]
fn test_new_representation() -> Result<()> {
    let builder = Arc::new(CountingIndexBuilder::default());
    let before = static_mpd(&[("p0", 0.0, video_set("v", &["v1", "v3"]))]);
    let after = static_mpd(&[("p0", 0.0, video_set("v", &["v1", "v2", "v3"]))]);
    let mut manifest = model(parsed(&before, &builder)?)?;
    let update = manifest.update(parsed(&after, &builder)?)?;

    let track = &update.periods.updated_periods[0].result.updated_tracks[0];
    let added: Vec<&str> = track.added_representations.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(added, vec!["v2"]);
    assert_eq!(update.warnings, vec![ManifestWarning::UnexpectedNewRepresentations {
        track_id: String::from("v"),
        count: 1,
    }]);
    let bitrates: Vec<u64> = manifest.periods[0].video[0].representations.iter().map(|r| r.bitrate).collect();
    assert_eq!(bitrates, vec![100_000, 200_000, 300_000]);
    Ok(())
}

#[test]
fn test_full_replace() -> Result<()> {
    let builder = Arc::new(CountingIndexBuilder::default());
    let before = static_mpd(&[("a", 0.0, video_set("v", &["v1"])),
                              ("b", 10.0, video_set("v", &["v1"]))]);
    let after = static_mpd(&[("b", 10.0, video_set("v", &["v1"])),
                             ("c", 20.0, video_set("v", &["v1"]))]);
    let mut manifest = model(parsed(&before, &builder)?)?;
    let update = manifest.replace(parsed(&after, &builder)?)?;

    assert_eq!(period_ids(&manifest), vec!["b", "c"]);
    let removed: Vec<&str> = update.periods.removed_periods.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(removed, vec!["a"]);
    let added: Vec<&str> = update.periods.added_periods.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(added, vec!["c"]);
    let updated: Vec<&str> = update.periods.updated_periods.iter().map(|p| p.period.id.as_str()).collect();
    assert_eq!(updated, vec!["b"]);
    assert_eq!(update.warnings, vec![ManifestWarning::RemovedPeriod { period_id: String::from("a") }]);
    assert_eq!(builder.replaces(), 1);
    assert_eq!(builder.updates(), 0);
    // the manifest-level fields follow the refreshed document
    assert_eq!(manifest.periods.last().and_then(|p| p.end), Some(30.0));
    assert_eq!(manifest.maximum_safe_position(0.0), 30.0);
    Ok(())
}

#[test]
fn test_full_replace_with_new_period_in_the_middle() -> Result<()> {
    let builder = Arc::new(CountingIndexBuilder::default());
    let before = static_mpd(&[("a", 0.0, video_set("v", &["v1"])),
                              ("c", 10.0, video_set("v", &["v1"]))]);
    let after = static_mpd(&[("a", 0.0, video_set("v", &["v1"])),
                             ("b", 10.0, video_set("v", &["v1"])),
                             ("c", 20.0, video_set("v", &["v1"]))]);
    let mut manifest = model(parsed(&before, &builder)?)?;
    let update = manifest.replace(parsed(&after, &builder)?)?;
    assert_eq!(period_ids(&manifest), vec!["a", "b", "c"]);
    assert_eq!(manifest.periods[2].start, 20.0);
    assert!(update.periods.removed_periods.is_empty());
    assert_eq!(update.periods.added_periods.len(), 1);
    assert_eq!(update.periods.updated_periods.len(), 2);
    Ok(())
}

#[test]
fn test_partial_update_appends_following_periods() -> Result<()> {
    let builder = Arc::new(CountingIndexBuilder::default());
    let before = static_mpd(&[("p0", 0.0, video_set("v", &["v1"]))]);
    let after = static_mpd(&[("p1", 10.0, video_set("v", &["v1"]))]);
    let mut manifest = model(parsed(&before, &builder)?)?;
    let update = manifest.update(parsed(&after, &builder)?)?;
    assert_eq!(period_ids(&manifest), vec!["p0", "p1"]);
    let added: Vec<&str> = update.periods.added_periods.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(added, vec!["p1"]);
    assert!(update.periods.removed_periods.is_empty());
    Ok(())
}

#[test]
fn test_partial_update_failures() -> Result<()> {
    let builder = Arc::new(CountingIndexBuilder::default());
    let before = static_mpd(&[("p0", 0.0, video_set("v", &["v1"])),
                              ("p1", 10.0, video_set("v", &["v1"]))]);
    let mut manifest = model(parsed(&before, &builder)?)?;

    // a gap between the known Periods and the refreshed ones
    let after = static_mpd(&[("p3", 30.0, video_set("v", &["v1"]))]);
    let err = manifest.update(parsed(&after, &builder)?).unwrap_err();
    assert_eq!(err, ManifestError::UpdateFailed(String::from("not enough data")));

    // starts within the known Periods, but with an unknown id
    let after = static_mpd(&[("x", 5.0, video_set("v", &["v1"]))]);
    let err = manifest.update(parsed(&after, &builder)?).unwrap_err();
    assert_eq!(err, ManifestError::UpdateFailed(String::from("incoherent data")));

    // the model is left untouched
    assert_eq!(period_ids(&manifest), vec!["p0", "p1"]);
    Ok(())
}

#[test]
fn test_track_changes() -> Result<()> {
    let builder = Arc::new(CountingIndexBuilder::default());
    let before = static_mpd(&[("p0", 0.0, video_set("v", &["v1"]) + &audio_set("en"))]);
    let after = static_mpd(&[("p0", 0.0, video_set("v", &["v1"]) + &audio_set("fr"))]);
    let mut manifest = model(parsed(&before, &builder)?)?;
    let update = manifest.replace(parsed(&after, &builder)?)?;

    let result = &update.periods.updated_periods[0].result;
    let removed: Vec<&str> = result.removed_tracks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(removed, vec!["en"]);
    let added: Vec<&str> = result.added_tracks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(added, vec!["fr"]);
    assert_eq!(update.warnings, vec![
        ManifestWarning::RemovedTrack { period_id: String::from("p0"), track_id: String::from("en") },
        ManifestWarning::UnexpectedNewTracks { period_id: String::from("p0"), count: 1 },
    ]);
    assert!(update.periods.has_structural_changes());
    let audio: Vec<&str> = manifest.periods[0].audio.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(audio, vec!["fr"]);
    Ok(())
}

#[test]
fn test_partial_update_evicts_unreachable_periods() -> Result<()> {
    // live edge at 100 seconds, with a 30 second time-shift window
    let live_mpd = |periods: &str| format!(
        r#"<MPD type="dynamic" availabilityStartTime="1970-01-01T00:00:00Z"
                minimumUpdatePeriod="PT2S" timeShiftBufferDepth="PT30S">{periods}</MPD>"#);
    let p0 = format!(r#"<Period id="p0" start="PT0S" duration="PT50S">{}</Period>"#, video_set("v", &["v1"]));
    let p1 = format!(r#"<Period id="p1" start="PT50S">{}</Period>"#, video_set("v", &["v1"]));
    let clock = FixedTime::new(0.0, 0.0);
    let parse_options = || ParseOptions::new()
        .external_clock_offset(100_000.0)
        .with_time_source(clock.clone());
    let manifest_options = ManifestOptions::new()
        .with_codec_support(ScriptedCodecSupport::supporting(&["avc1"]))
        .with_time_source(clock.clone());

    let parsed = parse_done(&live_mpd(&(p0 + &p1)), parse_options())?.manifest;
    let (mut manifest, _) = Manifest::from_parsed(parsed, manifest_options)?;
    assert_eq!(period_ids(&manifest), vec!["p0", "p1"]);
    assert!(manifest.current_minimum_safe_position() > 50.0);

    let refreshed = parse_done(&live_mpd(&p1), parse_options())?.manifest;
    let update = manifest.update(refreshed)?;
    assert_eq!(period_ids(&manifest), vec!["p1"]);
    let removed: Vec<&str> = update.periods.removed_periods.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(removed, vec!["p0"]);
    let updated: Vec<&str> = update.periods.updated_periods.iter().map(|p| p.period.id.as_str()).collect();
    assert_eq!(updated, vec!["p1"]);
    assert!(update.warnings.is_empty());
    Ok(())
}
