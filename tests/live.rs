// Tests for dynamic (live) manifests: clock synchronization and live bounds.
//
// To run only these tests while enabling printing to stdout/stderr
//
//    cargo test --test live -- --show-output

pub mod common;
use anyhow::{bail, Result};
use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use dash_manifest::manifest::{Manifest, ManifestOptions};
use dash_manifest::mpd::{parse_mpd, ParseOptions, ParseStatus};
use dash_manifest::ManifestWarning;
use common::{parse_done, setup_logging, FixedTime, ScriptedCodecSupport};


// availabilityStartTime is 100 seconds after the epoch
fn live_template_mpd(utc_timing: &str) -> String {
    format!(r#"<MPD type="dynamic" availabilityStartTime="1970-01-01T00:01:40Z"
                   minimumUpdatePeriod="PT2S" timeShiftBufferDepth="PT30S"
                   suggestedPresentationDelay="PT6S" publishTime="1970-01-01T00:08:00Z">
                 {utc_timing}
                 <Period id="live" start="PT0S">
                   <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001F">
                     <SegmentTemplate timescale="1000" duration="2000" media="$Number$.m4s"/>
                     <Representation id="v1" bandwidth="1000000"/>
                   </AdaptationSet>
                 </Period>
               </MPD>"#)
}

const HTTP_TIMING: &str = r#"<UTCTiming schemeIdUri="urn:mpeg:dash:utc:http-iso:2014" value="https://time.example.com/now"/>"#;


#[test]
fn test_live_position_from_external_clock_offset() -> Result<()> {
    setup_logging();
    let clock = FixedTime::new(0.0, 0.0);
    let options = ParseOptions::new()
        .external_clock_offset(500_000.0)
        .with_time_source(clock.clone());
    let manifest = parse_done(&live_template_mpd(HTTP_TIMING), options)?.manifest;
    assert!(manifest.is_dynamic);
    assert!(manifest.is_live);
    assert_relative_eq!(manifest.availability_start_time, 100.0);
    assert_eq!(manifest.clock_offset, Some(500_000.0));
    let bounds = manifest.time_bounds;
    assert_relative_eq!(bounds.live_position(0.0).unwrap(), 500_000.0 / 1000.0 - 100.0);
    assert_relative_eq!(bounds.maximum_safe_position(0.0), 400.0);
    assert_relative_eq!(bounds.minimum_safe_position(0.0), 370.0);
    assert_eq!(bounds.timeshift_depth, Some(30.0));
    // the window moves with time
    assert!(bounds.maximum_time_data.is_linear);
    assert_relative_eq!(bounds.maximum_safe_position(2_000.0), 402.0);
    assert_relative_eq!(bounds.live_position(2_000.0).unwrap(), 402.0);
    assert_relative_eq!(bounds.minimum_safe_position(2_000.0), 372.0);
    Ok(())
}

#[test]
fn test_manifest_metadata() -> Result<()> {
    let options = ParseOptions::new()
        .external_clock_offset(500_000.0)
        .with_time_source(FixedTime::new(0.0, 0.0));
    let manifest = parse_done(&live_template_mpd(""), options)?.manifest;
    assert_eq!(manifest.lifetime, Some(2.0));
    assert_eq!(manifest.suggested_presentation_delay, Some(6.0));
    assert_eq!(manifest.publish_time.map(|t| t.timestamp()), Some(480));
    // minimumUpdatePeriod is present: more Periods may come
    assert!(!manifest.is_last_period_known);

    let xml = live_template_mpd("").replace("PT2S", "PT0S");
    let options = ParseOptions::new()
        .external_clock_offset(500_000.0)
        .with_time_source(FixedTime::new(0.0, 0.0));
    let manifest = parse_done(&xml, options)?.manifest;
    assert_eq!(manifest.lifetime, Some(3.0));
    Ok(())
}

#[test]
fn test_clock_request() -> Result<()> {
    let clock = FixedTime::new(0.0, 0.0);
    let mpd = dash_manifest::parse(&live_template_mpd(HTTP_TIMING))?;
    let ParseStatus::NeedsClock(request) = parse_mpd(mpd, ParseOptions::new().with_time_source(clock))? else {
        bail!("expected a clock request");
    };
    assert_eq!(request.url(), "https://time.example.com/now");
    let ParseStatus::Done(result) = request.resume(Ok(String::from("1970-01-01T00:08:20Z")))? else {
        bail!("expected a finished parse");
    };
    assert_eq!(result.manifest.clock_offset, Some(500_000.0));
    assert_relative_eq!(result.manifest.time_bounds.live_position(0.0).unwrap(), 400.0);
    assert!(result.warnings.is_empty());
    Ok(())
}

#[test]
fn test_clock_fetch_failure_falls_back_to_local_time() -> Result<()> {
    // the local clock says 450 seconds after the epoch
    let clock = FixedTime::new(0.0, 450_000.0);
    let mpd = dash_manifest::parse(&live_template_mpd(HTTP_TIMING))?;
    let ParseStatus::NeedsClock(request) = parse_mpd(mpd, ParseOptions::new().with_time_source(clock))? else {
        bail!("expected a clock request");
    };
    let ParseStatus::Done(result) = request.resume(Err(String::from("connection refused")))? else {
        bail!("the clock is only requested once");
    };
    assert_eq!(result.warnings, vec![ManifestWarning::ClockFetchFailed(String::from("connection refused"))]);
    assert_eq!(result.manifest.clock_offset, None);
    assert_relative_eq!(result.manifest.time_bounds.maximum_safe_position(0.0), 350.0);
    assert_relative_eq!(result.manifest.time_bounds.live_position(0.0).unwrap(), 350.0);
    Ok(())
}

#[test]
fn test_invalid_clock_payload() -> Result<()> {
    let clock = FixedTime::new(0.0, 450_000.0);
    let mpd = dash_manifest::parse(&live_template_mpd(HTTP_TIMING))?;
    let ParseStatus::NeedsClock(request) = parse_mpd(mpd, ParseOptions::new().with_time_source(clock))? else {
        bail!("expected a clock request");
    };
    let ParseStatus::Done(result) = request.resume(Ok(String::from("tomorrow at noon")))? else {
        bail!("expected a finished parse");
    };
    assert_eq!(result.warnings, vec![ManifestWarning::InvalidClockPayload(String::from("tomorrow at noon"))]);
    assert_eq!(result.manifest.clock_offset, None);
    Ok(())
}

#[test]
fn test_direct_utc_timing() -> Result<()> {
    let timing = r#"<UTCTiming schemeIdUri="urn:mpeg:dash:utc:direct:2014" value="1970-01-01T00:08:20Z"/>"#;
    let options = ParseOptions::new().with_time_source(FixedTime::new(0.0, 0.0));
    let manifest = parse_done(&live_template_mpd(timing), options)?.manifest;
    assert_eq!(manifest.clock_offset, Some(500_000.0));
    assert_relative_eq!(manifest.time_bounds.live_position(0.0).unwrap(), 400.0);
    Ok(())
}

#[test]
fn test_previous_manifest_clock_is_reused() -> Result<()> {
    let clock = FixedTime::new(0.0, 0.0);
    let options = ParseOptions::new()
        .external_clock_offset(500_000.0)
        .with_time_source(clock.clone());
    let parsed = parse_done(&live_template_mpd(HTTP_TIMING), options)?.manifest;
    let codecs = ScriptedCodecSupport::supporting(&["avc1"]);
    let (manifest, _) = Manifest::from_parsed(parsed, ManifestOptions::new().with_codec_support(codecs))?;

    clock.advance(2_000.0);
    let options = ParseOptions::new()
        .previous_manifest(&manifest)
        .with_time_source(clock.clone());
    let refreshed = parse_done(&live_template_mpd(HTTP_TIMING), options)?.manifest;
    assert_eq!(refreshed.clock_offset, Some(500_000.0));
    assert_relative_eq!(refreshed.time_bounds.live_position(2_000.0).unwrap(), 402.0);
    Ok(())
}

#[test]
fn test_timeline_last_position() -> Result<()> {
    let xml = r#"<MPD type="dynamic" availabilityStartTime="1970-01-01T00:00:00Z" minimumUpdatePeriod="PT2S">
                  <Period id="p0" start="PT0S">
                    <AdaptationSet contentType="audio" mimeType="audio/mp4" codecs="mp4a.40.2">
                      <SegmentTemplate timescale="1000" media="$Time$.m4s">
                        <SegmentTimeline><S t="0" d="2000" r="9"/></SegmentTimeline>
                      </SegmentTemplate>
                      <Representation id="a1" bandwidth="64000"/>
                    </AdaptationSet>
                  </Period>
                 </MPD>"#;
    let clock = FixedTime::new(10_000.0, 0.0);
    let options = ParseOptions::new()
        .external_clock_offset(0.0)
        .with_time_source(clock);
    let manifest = parse_done(xml, options)?.manifest;
    let bounds = manifest.time_bounds;
    assert_relative_eq!(bounds.maximum_safe_position(10_000.0), 20.0);
    assert_relative_eq!(bounds.maximum_safe_position(12_000.0), 22.0);
    assert_relative_eq!(bounds.minimum_safe_position(10_000.0), 0.0);
    assert_eq!(bounds.timeshift_depth, None);
    Ok(())
}

#[test]
fn test_timeline_repeat_count_overflow() -> Result<()> {
    let xml = r#"<MPD type="dynamic" availabilityStartTime="1970-01-01T00:00:00Z" minimumUpdatePeriod="PT2S">
                  <Period id="p0" start="PT0S">
                    <AdaptationSet contentType="audio" mimeType="audio/mp4" codecs="mp4a.40.2">
                      <SegmentTemplate timescale="1000" media="$Time$.m4s">
                        <SegmentTimeline><S t="0" d="2000" r="9223372036854775000"/></SegmentTimeline>
                      </SegmentTemplate>
                      <Representation id="a1" bandwidth="64000"/>
                    </AdaptationSet>
                  </Period>
                 </MPD>"#;
    let options = ParseOptions::new()
        .external_clock_offset(0.0)
        .with_time_source(FixedTime::new(10_000.0, 0.0));
    let manifest = parse_done(xml, options)?.manifest;
    // the timeline end is unknown, so the last position comes from the server clock
    assert_relative_eq!(manifest.time_bounds.maximum_safe_position(10_000.0), 10.0);
    Ok(())
}

#[test]
fn test_time_shift_depth_is_padded_by_max_segment_duration() -> Result<()> {
    let xml = live_template_mpd("")
        .replace(r#"timeShiftBufferDepth="PT30S""#, r#"timeShiftBufferDepth="PT30S" maxSegmentDuration="PT4S""#);
    let options = ParseOptions::new()
        .external_clock_offset(500_000.0)
        .with_time_source(FixedTime::new(0.0, 0.0));
    let bounds = parse_done(&xml, options)?.manifest.time_bounds;
    assert_eq!(bounds.timeshift_depth, Some(34.0));
    assert_relative_eq!(bounds.minimum_safe_position, 370.0);
    assert_relative_eq!(bounds.maximum_safe_position(0.0), 400.0);
    Ok(())
}

#[test]
fn test_time_shift_depth_covers_the_live_position() -> Result<()> {
    // segments are published up to 20s while the server clock puts the live edge at 30s
    let xml = r#"<MPD type="dynamic" availabilityStartTime="1970-01-01T00:00:00Z"
                      minimumUpdatePeriod="PT2S" timeShiftBufferDepth="PT10S">
                  <Period id="p0" start="PT0S">
                    <AdaptationSet contentType="audio" mimeType="audio/mp4" codecs="mp4a.40.2">
                      <SegmentTemplate timescale="1000" media="$Time$.m4s">
                        <SegmentTimeline><S t="0" d="2000" r="9"/></SegmentTimeline>
                      </SegmentTemplate>
                      <Representation id="a1" bandwidth="64000"/>
                    </AdaptationSet>
                  </Period>
                 </MPD>"#;
    let options = ParseOptions::new()
        .external_clock_offset(30_000.0)
        .with_time_source(FixedTime::new(0.0, 0.0));
    let bounds = parse_done(xml, options)?.manifest.time_bounds;
    assert_relative_eq!(bounds.maximum_safe_position(0.0), 20.0);
    assert_relative_eq!(bounds.live_position(0.0).unwrap(), 30.0);
    assert_relative_eq!(bounds.minimum_safe_position, 10.0);
    // widened from 10s to the distance between the live position and the minimum position
    assert_eq!(bounds.timeshift_depth, Some(20.0));
    assert_relative_eq!(bounds.minimum_safe_position(0.0), 10.0);
    Ok(())
}

#[test]
fn test_local_clock_guess_before_period_start() -> Result<()> {
    // without any clock the local time gives 350s, before the start of the only Period
    let xml = live_template_mpd("").replace(r#"start="PT0S""#, r#"start="PT500S""#);
    let options = ParseOptions::new().with_time_source(FixedTime::new(0.0, 450_000.0));
    let result = parse_done(&xml, options)?;
    assert_eq!(result.manifest.clock_offset, None);
    assert_relative_eq!(result.manifest.periods[0].start, 500.0);
    let bounds = result.manifest.time_bounds;
    assert_relative_eq!(bounds.maximum_safe_position(0.0), 350.0);
    assert_relative_eq!(bounds.live_position(0.0).unwrap(), 350.0);
    Ok(())
}

#[test]
fn test_local_clock_guess_retried_on_earlier_periods() -> Result<()> {
    let xml = r#"<MPD type="dynamic" availabilityStartTime="1970-01-01T00:01:40Z" minimumUpdatePeriod="PT2S">
                  <Period id="p0" start="PT0S">
                    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001F">
                      <SegmentTemplate timescale="1000" duration="2000" media="$Number$.m4s"/>
                      <Representation id="v1" bandwidth="1000000"/>
                    </AdaptationSet>
                  </Period>
                  <Period id="p1" start="PT500S">
                    <AdaptationSet contentType="video" mimeType="video/mp4" codecs="avc1.64001F">
                      <SegmentTemplate timescale="1000" duration="2000" media="$Number$.m4s"/>
                      <Representation id="v2" bandwidth="1000000"/>
                    </AdaptationSet>
                  </Period>
                 </MPD>"#;
    let options = ParseOptions::new().with_time_source(FixedTime::new(0.0, 450_000.0));
    let manifest = parse_done(xml, options)?.manifest;
    let ids: Vec<&str> = manifest.periods.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p0", "p1"]);
    // rejected for p1 which starts at 500s, accepted for p0
    assert_relative_eq!(manifest.time_bounds.maximum_safe_position(0.0), 350.0);
    Ok(())
}
