//! Normalization of Representation elements into [`ParsedRepresentation`] values.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{trace, warn};
use url::Url;
use crate::content_protection::ContentProtectionParser;
use crate::ir::{self, Descriptor};
use crate::parsed::{CdnMetadata, ColorSpace, Eotf, HdrInfo, ParsedRepresentation};
use crate::period::PeriodContext;
use crate::segment::IndexContext;
use crate::{dedup_id, ManifestWarning};


const HEVC_HDR_PQ10_PROFILE: &str = "http://dashif.org/guidelines/dash-if-uhd#hevc-hdr-pq10";
const TRANSFER_CHARACTERISTICS_SCHEME: &str = "urn:mpeg:mpegB:cicp:TransferCharacteristics";
const DOLBY_EXTENSION_TYPE_SCHEME: &str = "tag:dolby.com,2018:dash:EC3_ExtensionType:2018";

lazy_static! {
    static ref WEBM_CODEC_RE: Regex = Regex::new(r"^vp(08|09|10)").unwrap();
}


/// A BaseURL after resolution against all the BaseURLs of enclosing elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBaseUrl {
    pub url: String,
    pub service_location: Option<String>,
}

fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://") ||
        s.starts_with("https://") ||
        s.starts_with("file://") ||
        s.starts_with("ftp://")
}

// We are careful to keep the query portion of the current URL (an authentication token on the
// manifest URL, for example) when the new URL doesn't specify its own.
//
// Examples
//
// join_url(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
//   https://example.com/video42.mp4?auth=secret
//
// join_url(https://example.com/manifest.mpd?auth=old, /video42.mp4?auth=new) =>
//   https://example.com/video42.mp4?auth=new
pub(crate) fn join_url(current: &str, new: &str) -> String {
    if is_absolute_url(new) || current.is_empty() {
        return new.to_string();
    }
    if let Ok(base) = Url::parse(current) {
        if let Ok(mut merged) = base.join(new) {
            if merged.query().is_none() {
                merged.set_query(base.query());
            }
            return merged.to_string();
        }
    }
    // Not a URL we can parse (a relative path, for instance): plain path concatenation.
    match current.rfind('/') {
        Some(idx) => format!("{}{new}", &current[..=idx]),
        None => new.to_string(),
    }
}

/// The cross product of the currently resolved BaseURLs with those declared by an element. Each
/// combination keeps the most specific `@serviceLocation`.
pub fn resolve_base_urls(current: &[ResolvedBaseUrl], declared: &[ir::BaseURL]) -> Vec<ResolvedBaseUrl> {
    if declared.is_empty() {
        return current.to_vec();
    }
    let declared = declared.iter().map(|bu| ResolvedBaseUrl {
        url: bu.base.trim().to_string(),
        service_location: bu.serviceLocation.clone(),
    });
    if current.is_empty() {
        return declared.collect();
    }
    let declared: Vec<ResolvedBaseUrl> = declared.collect();
    let mut resolved = Vec::with_capacity(current.len() * declared.len());
    for cur in current {
        for new in &declared {
            let candidate = ResolvedBaseUrl {
                url: join_url(&cur.url, &new.url),
                service_location: new.service_location.clone().or_else(|| cur.service_location.clone()),
            };
            // absolute declared URLs give the same result for every inherited one
            if !resolved.contains(&candidate) {
                resolved.push(candidate);
            }
        }
    }
    resolved
}

/// Parse a `@frameRate` attribute, which is either a number or a fraction such as "30000/1001".
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let s = s.trim();
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        },
        None => s.parse::<f64>().ok()?,
    };
    rate.is_finite().then_some(rate)
}

/// Extract HDR characteristics from a WebM-family codec string, whose dot-separated fields are
/// profile, level, bit depth, chroma subsampling, colour primaries, transfer characteristics and
/// matrix coefficients (for example "vp09.02.10.10.01.09.16.09.01").
pub fn webm_hdr_information(codecs: &str) -> Option<HdrInfo> {
    let fields: Vec<&str> = codecs.split('.').collect();
    if !matches!(fields.first(), Some(&"vp08") | Some(&"vp09") | Some(&"vp10")) {
        return None;
    }
    let color_depth = match fields.get(3) {
        Some(&"10") => Some(10),
        Some(&"12") => Some(12),
        _ => None,
    };
    let eotf = match fields.get(6) {
        Some(&"16") => Some(Eotf::Pq),
        Some(&"18") => Some(Eotf::Hlg),
        _ => None,
    };
    let color_space = match (fields.get(5), fields.get(7)) {
        (Some(&"09"), Some(&"09")) => Some(ColorSpace::Rec2020),
        _ => None,
    };
    if color_depth.is_none() || eotf.is_none() {
        return None;
    }
    Some(HdrInfo { color_depth, eotf, color_space })
}

/// HDR characteristics declared by DASH-IF profiles or CICP transfer characteristics, or carried in
/// a WebM codec string.
pub fn hdr_information(
    profiles: &str,
    properties: &[&Descriptor],
    codecs: Option<&str>) -> Option<HdrInfo>
{
    let codecs = codecs?;
    if profiles.contains(HEVC_HDR_PQ10_PROFILE) &&
        (codecs == "hvc1.2.4.L153.B0" || codecs == "hev1.2.4.L153.B0")
    {
        return Some(HdrInfo {
            color_depth: Some(10),
            eotf: Some(Eotf::Pq),
            color_space: Some(ColorSpace::Rec2020),
        });
    }
    let transfer = properties.iter()
        .find(|p| p.schemeIdUri.as_deref() == Some(TRANSFER_CHARACTERISTICS_SCHEME));
    if let Some(tc) = transfer {
        match tc.value.as_deref() {
            // SDR
            Some("15") => return None,
            Some("16") => return Some(HdrInfo { eotf: Some(Eotf::Pq), ..Default::default() }),
            Some("18") => return Some(HdrInfo { eotf: Some(Eotf::Hlg), ..Default::default() }),
            _ => (),
        }
    }
    if WEBM_CODEC_RE.is_match(codecs) {
        return webm_hdr_information(codecs);
    }
    None
}

// This old-style AAC codec string is badly supported by some platforms.
fn normalize_codec(codec: &str) -> String {
    if codec == "mp4a.40.02" {
        String::from("mp4a.40.2")
    } else {
        codec.to_string()
    }
}

fn synthesize_id(rep: &ir::Representation, adaptation: &ir::AdaptationSet) -> String {
    let mut id = rep.bandwidth.unwrap_or(0).to_string();
    if let Some(h) = rep.height.or(adaptation.height) {
        id += &format!("-{h}");
    }
    if let Some(w) = rep.width.or(adaptation.width) {
        id += &format!("-{w}");
    }
    if let Some(mime) = rep.mimeType.as_ref().or(adaptation.mimeType.as_ref()) {
        id += &format!("-{mime}");
    }
    if let Some(codecs) = rep.codecs.as_ref().or(adaptation.codecs.as_ref()) {
        id += &format!("-{codecs}");
    }
    id
}

/// Normalize the Representations of one AdaptationSet. Content protection descriptors of the
/// AdaptationSet and of each Representation are handed to `protection`, to be resolved once the
/// whole document has been seen.
pub fn parse_representations(
    adaptation: &ir::AdaptationSet,
    ctx: &PeriodContext<'_>,
    protection: &mut ContentProtectionParser,
    warnings: &mut Vec<ManifestWarning>) -> Vec<ParsedRepresentation>
{
    let mut parsed: Vec<ParsedRepresentation> = Vec::with_capacity(adaptation.representations.len());
    let mut ids: Vec<String> = Vec::with_capacity(adaptation.representations.len());
    let profiles = format!("{}{}",
                           adaptation.profiles.as_deref().unwrap_or(""),
                           ctx.manifest_profiles.unwrap_or(""));
    for rep in &adaptation.representations {
        let id = match rep.id.as_ref().filter(|id| !id.is_empty()) {
            Some(id) => id.clone(),
            None => synthesize_id(rep, adaptation),
        };
        let id = dedup_id(id, &ids);
        ids.push(id.clone());

        let bitrate = match rep.bandwidth {
            Some(bw) => bw,
            None => {
                warn!("No usable bitrate found for Representation {id}");
                warnings.push(ManifestWarning::MissingBitrate { representation_id: id.clone() });
                0
            },
        };

        let base_urls = resolve_base_urls(ctx.base_urls, &rep.BaseURL);
        let cdn_metadata = if base_urls.is_empty() {
            vec![CdnMetadata { base_url: String::new(), id: None }]
        } else {
            base_urls.into_iter()
                .map(|bu| CdnMetadata { base_url: bu.url, id: bu.service_location })
                .collect()
        };

        let base_codec = rep.codecs.as_deref()
            .or(adaptation.codecs.as_deref())
            .map(normalize_codec);
        let supplemental = rep.supplementalCodecs.as_deref()
            .or(adaptation.supplementalCodecs.as_deref())
            .unwrap_or("");
        let mut codecs: Vec<String> = supplemental.split_whitespace().map(normalize_codec).collect();
        if let Some(base) = &base_codec {
            codecs.push(base.clone());
        }

        let is_spatial_audio = rep.SupplementalProperty.iter().any(|p| {
            p.schemeIdUri.as_deref() == Some(DOLBY_EXTENSION_TYPE_SCHEME) && p.value.as_deref() == Some("JOC")
        });

        let protection_slot = if adaptation.ContentProtection.is_empty() && rep.ContentProtection.is_empty() {
            None
        } else {
            let slot = protection.new_slot();
            for cp in adaptation.ContentProtection.iter().chain(rep.ContentProtection.iter()) {
                protection.add(slot, cp);
            }
            Some(slot)
        };

        let properties: Vec<&Descriptor> = adaptation.EssentialProperty.iter()
            .chain(adaptation.SupplementalProperty.iter())
            .chain(rep.EssentialProperty.iter())
            .chain(rep.SupplementalProperty.iter())
            .collect();
        let hdr_info = hdr_information(&profiles, &properties, base_codec.as_deref());

        let index = ctx.index_builder.build(&IndexContext {
            representation_id: &id,
            representation: rep,
            adaptation,
            period_template: ctx.period_template,
            period_start: ctx.start,
            period_end: ctx.end,
            is_dynamic: ctx.is_dynamic,
            live_edge: ctx.live_edge,
            time_shift_buffer_depth: ctx.time_shift_buffer_depth,
            received_time: ctx.received_time,
        });
        trace!("Representation {id}: bitrate {bitrate}, codecs {codecs:?}");
        parsed.push(ParsedRepresentation {
            id,
            bitrate,
            codecs,
            mime_type: rep.mimeType.clone().or_else(|| adaptation.mimeType.clone()),
            width: rep.width.or(adaptation.width),
            height: rep.height.or(adaptation.height),
            frame_rate: rep.frameRate.as_deref()
                .or(adaptation.frameRate.as_deref())
                .and_then(parse_frame_rate),
            hdr_info,
            is_spatial_audio,
            cdn_metadata,
            content_protections: None,
            index,
            protection_slot,
        });
    }
    parsed
}
