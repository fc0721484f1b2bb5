//! Grouping of AdaptationSets into tracks: type inference, accessibility and role signaling,
//! merging of switchable AdaptationSets, trick-mode tracks and preference ordering.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};
use crate::content_protection::ContentProtectionParser;
use crate::ir::{self, Accessibility, Role};
use crate::manifest::TrackType;
use crate::parsed::{ParsedTrack, ParsedTracks};
use crate::period::PeriodContext;
use crate::representation::{parse_representations, resolve_base_urls};
use crate::{dedup_id, ManifestWarning};


const DASH_ROLE_SCHEME: &str = "urn:mpeg:dash:role:2011";
const AUDIO_PURPOSE_SCHEME: &str = "urn:tva:metadata:cs:AudioPurposeCS:2007";
const TRICK_MODE_SCHEME: &str = "http://dashif.org/guidelines/trickmode";
const ADAPTATION_SET_SWITCHING_SCHEME: &str = "urn:mpeg:dash:adaptation-set-switching:2016";


fn type_from_name(name: &str) -> Option<TrackType> {
    match name {
        "audio" => Some(TrackType::Audio),
        "video" => Some(TrackType::Video),
        "text" => Some(TrackType::Text),
        _ => None,
    }
}

fn type_from_mime_type(mime_type: &str, roles: &[Role]) -> Option<TrackType> {
    let top_level = mime_type.split('/').next().unwrap_or("");
    if let Some(tt) = type_from_name(top_level) {
        return Some(tt);
    }
    match mime_type {
        "application/ttml+xml" => Some(TrackType::Text),
        // fragmented MP4 subtitles are only recognizable by their role
        "application/mp4" => roles.iter()
            .any(|r| r.schemeIdUri.as_deref() == Some(DASH_ROLE_SCHEME) &&
                 matches!(r.value.as_deref(), Some("subtitle") | Some("caption")))
            .then_some(TrackType::Text),
        _ => None,
    }
}

fn type_from_codecs(codecs: &str) -> Option<TrackType> {
    if ["avc", "hev", "hvc", "vp8", "vp9", "av1"].iter().any(|p| codecs.starts_with(p)) {
        return Some(TrackType::Video);
    }
    if codecs.starts_with("vtt") || codecs.starts_with("wvtt") || codecs.starts_with("stpp") {
        return Some(TrackType::Text);
    }
    if codecs.starts_with("mp4a") {
        return Some(TrackType::Audio);
    }
    None
}

/// Infer the type of the content of an AdaptationSet, from its `@contentType`, then its MIME type
/// (with the help of Role signaling), its codecs, and finally the same attributes on each of its
/// Representations.
pub fn infer_track_type(adaptation: &ir::AdaptationSet) -> Option<TrackType> {
    let non_empty = |s: &Option<String>| s.clone().filter(|s| !s.is_empty());
    if let Some(tt) = non_empty(&adaptation.contentType).as_deref().and_then(type_from_name) {
        return Some(tt);
    }
    if let Some(tt) = non_empty(&adaptation.mimeType).and_then(|m| type_from_mime_type(&m, &adaptation.Role)) {
        return Some(tt);
    }
    if let Some(tt) = non_empty(&adaptation.codecs).and_then(|c| type_from_codecs(&c)) {
        return Some(tt);
    }
    for rep in &adaptation.representations {
        if let Some(tt) = rep.contentType.as_deref().and_then(type_from_name) {
            return Some(tt);
        }
        if let Some(tt) = rep.mimeType.as_deref().and_then(|m| type_from_mime_type(m, &adaptation.Role)) {
            return Some(tt);
        }
        if let Some(tt) = rep.codecs.as_deref().and_then(type_from_codecs) {
            return Some(tt);
        }
    }
    None
}

fn is_visually_impaired(a: &Accessibility) -> bool {
    a.schemeIdUri.as_deref() == Some(AUDIO_PURPOSE_SCHEME) && a.value.as_deref() == Some("1")
}

fn is_hard_of_hearing(a: &Accessibility) -> bool {
    a.schemeIdUri.as_deref() == Some(AUDIO_PURPOSE_SCHEME) && a.value.as_deref() == Some("2")
}

fn is_captioning(accessibilities: &[Accessibility], roles: &[Role]) -> bool {
    accessibilities.iter().any(is_hard_of_hearing) ||
        roles.iter().any(|r| r.schemeIdUri.as_deref() == Some(DASH_ROLE_SCHEME) && r.value.as_deref() == Some("caption"))
}

fn is_forced_subtitle(roles: &[Role]) -> bool {
    roles.iter().any(|r| {
        r.schemeIdUri.as_deref() == Some(DASH_ROLE_SCHEME) &&
            matches!(r.value.as_deref(), Some("forced-subtitle") | Some("forced_subtitle"))
    })
}

fn is_sign_interpreted(a: &Accessibility) -> bool {
    a.schemeIdUri.as_deref() == Some(DASH_ROLE_SCHEME) && a.value.as_deref() == Some("sign")
}

fn is_main(roles: &[Role]) -> bool {
    roles.iter().any(|r| {
        r.value.as_deref() == Some("main") &&
            r.schemeIdUri.as_deref().map_or(true, |s| s == DASH_ROLE_SCHEME)
    })
}

/// The ids of the AdaptationSets that this one can seamlessly switch with.
pub fn adaptation_set_switching_ids(adaptation: &ir::AdaptationSet) -> Vec<String> {
    adaptation.SupplementalProperty.iter()
        .find(|p| p.schemeIdUri.as_deref() == Some(ADAPTATION_SET_SWITCHING_SCHEME) && p.value.is_some())
        .and_then(|p| p.value.as_deref())
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default()
}

/// Flags which take part in the synthesized identifier of a track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackFlags {
    pub closed_caption: bool,
    pub forced_subtitles: bool,
    pub audio_description: bool,
    pub sign_interpreted: bool,
    pub trick_mode: bool,
}

fn track_id(adaptation: &ir::AdaptationSet, track_type: TrackType, flags: &TrackFlags) -> String {
    if let Some(id) = adaptation.id.as_ref().filter(|id| !id.is_empty()) {
        return id.clone();
    }
    let mut id = track_type.to_string();
    if let Some(lang) = adaptation.lang.as_ref().filter(|l| !l.is_empty()) {
        id += &format!("-{lang}");
    }
    if flags.closed_caption {
        id += "-cc";
    }
    if flags.forced_subtitles {
        id += "-fs";
    }
    if flags.audio_description {
        id += "-ad";
    }
    if flags.sign_interpreted {
        id += "-si";
    }
    if flags.trick_mode {
        id += "-trickMode";
    }
    for attr in [&adaptation.contentType, &adaptation.codecs, &adaptation.mimeType, &adaptation.frameRate] {
        if let Some(v) = attr.as_ref().filter(|v| !v.is_empty()) {
            id += &format!("-{v}");
        }
    }
    id
}

/// Ordering information kept alongside each track until the final sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackPriority {
    pub priority: u64,
    pub is_main: bool,
    pub index_in_mpd: usize,
}

/// Preference order between tracks of the same type: higher `@selectionPriority` first, then tracks
/// with a "main" Role, then document order.
pub fn compare_tracks(a: &TrackPriority, b: &TrackPriority) -> Ordering {
    b.priority.cmp(&a.priority)
        .then_with(|| b.is_main.cmp(&a.is_main))
        .then_with(|| a.index_in_mpd.cmp(&b.index_in_mpd))
}

// An AdaptationSet that declared an id, remembered for later switchable siblings.
struct SwitchingInfo {
    track_id: String,
    switching_ids: Vec<String>,
}

/// Attach each trick-mode track to the tracks it declares itself a trick-mode variant of, by adding
/// its id to their `trick_mode_track_ids`. Trick-mode tracks themselves end up in
/// `tracks.trick_mode`.
pub fn attach_trick_mode_tracks(tracks: &mut ParsedTracks, trick_mode: Vec<(ParsedTrack, Vec<String>)>) {
    for (trick, targets) in trick_mode {
        for target in &targets {
            for track in tracks.audio.iter_mut().chain(tracks.video.iter_mut()).chain(tracks.text.iter_mut()) {
                if &track.id == target {
                    track.trick_mode_track_ids.push(trick.id.clone());
                }
            }
        }
        tracks.trick_mode.push(trick);
    }
}

/// Normalize the AdaptationSets of a Period into tracks.
pub fn parse_adaptation_sets(
    adaptations: &[ir::AdaptationSet],
    ctx: &PeriodContext<'_>,
    protection: &mut ContentProtectionParser,
    warnings: &mut Vec<ManifestWarning>) -> ParsedTracks
{
    let mut candidates: HashMap<TrackType, Vec<(ParsedTrack, TrackPriority)>> = HashMap::new();
    let mut trick_mode: Vec<(ParsedTrack, Vec<String>)> = Vec::new();
    let mut ids: Vec<String> = Vec::new();
    let mut switching_infos: HashMap<String, SwitchingInfo> = HashMap::new();

    for (index_in_mpd, adaptation) in adaptations.iter().enumerate() {
        let Some(track_type) = infer_track_type(adaptation) else {
            debug!("Ignoring AdaptationSet #{index_in_mpd} of unknown content type");
            continue;
        };
        let roles = &adaptation.Role;
        let accessibilities = &adaptation.Accessibility;
        let trick_mode_targets: Option<Vec<String>> = adaptation.EssentialProperty.iter()
            .find(|p| p.schemeIdUri.as_deref() == Some(TRICK_MODE_SCHEME))
            .map(|p| p.value.as_deref().unwrap_or("").split_whitespace().map(String::from).collect());
        let flags = TrackFlags {
            closed_caption: track_type == TrackType::Text && is_captioning(accessibilities, roles),
            forced_subtitles: track_type == TrackType::Text && is_forced_subtitle(roles),
            audio_description: track_type == TrackType::Audio && accessibilities.iter().any(is_visually_impaired),
            sign_interpreted: track_type == TrackType::Video && accessibilities.iter().any(is_sign_interpreted),
            trick_mode: trick_mode_targets.is_some(),
        };
        let id = dedup_id(track_id(adaptation, track_type, &flags), &ids);
        ids.push(id.clone());

        let base_urls = resolve_base_urls(ctx.base_urls, &adaptation.BaseURL);
        let rep_ctx = PeriodContext { base_urls: &base_urls, ..*ctx };
        let representations = parse_representations(adaptation, &rep_ctx, protection, warnings);

        let track = ParsedTrack {
            id: id.clone(),
            track_type,
            language: adaptation.lang.clone(),
            label: adaptation.Label.as_ref().map(|l| l.content.clone()),
            closed_caption: flags.closed_caption,
            forced_subtitles: flags.forced_subtitles,
            audio_description: flags.audio_description,
            dub: roles.iter().any(|r| r.value.as_deref() == Some("dub")),
            sign_interpreted: flags.sign_interpreted,
            is_trick_mode_track: flags.trick_mode,
            trick_mode_track_ids: Vec::new(),
            representations,
        };
        let priority = TrackPriority {
            priority: adaptation.selectionPriority.unwrap_or(1),
            is_main: is_main(roles),
            index_in_mpd,
        };
        let switching_ids = adaptation_set_switching_ids(adaptation);
        let original_id = adaptation.id.clone().filter(|id| !id.is_empty());

        if let Some(targets) = trick_mode_targets {
            trick_mode.push((track, targets));
        } else {
            let of_type = candidates.entry(track_type).or_default();
            let mut track = Some(track);
            for switching_id in &switching_ids {
                let Some(info) = switching_infos.get(switching_id) else { continue };
                let mutual = original_id.as_ref().is_some_and(|oid| info.switching_ids.contains(oid));
                if info.track_id == id || !mutual {
                    continue;
                }
                let Some((into, into_priority)) = of_type.iter_mut().find(|(t, _)| t.id == info.track_id) else {
                    continue;
                };
                let Some(current) = track.as_ref() else { break };
                if into.audio_description != current.audio_description ||
                    into.closed_caption != current.closed_caption ||
                    into.language != current.language
                {
                    continue;
                }
                info!("Merging switchable AdaptationSets {} and {switching_id}", original_id.as_deref().unwrap_or(""));
                if let Some(current) = track.take() {
                    for mut rep in current.representations {
                        let rep_ids: Vec<String> = into.representations.iter().map(|r| r.id.clone()).collect();
                        rep.id = dedup_id(rep.id, &rep_ids);
                        into.representations.push(rep);
                    }
                }
                *into_priority = TrackPriority {
                    priority: into_priority.priority.max(priority.priority),
                    is_main: into_priority.is_main || priority.is_main,
                    index_in_mpd: into_priority.index_in_mpd.min(priority.index_in_mpd),
                };
                break;
            }
            if let Some(track) = track {
                of_type.push((track, priority));
            }
        }

        if let Some(oid) = original_id {
            switching_infos.entry(oid).or_insert(SwitchingInfo { track_id: id, switching_ids });
        }
    }

    let mut tracks = ParsedTracks::default();
    for (track_type, mut of_type) in candidates {
        of_type.sort_by(|a, b| compare_tracks(&a.1, &b.1));
        tracks.of_type_mut(track_type).extend(of_type.into_iter().map(|(t, _)| t));
    }
    attach_trick_mode_tracks(&mut tracks, trick_mode);
    tracks
}
