//! The intermediate tree: typed structs mirroring the elements and attributes of a DASH MPD.
//
// The MPD format is documented by ISO using an XML Schema at
// https://standards.iso.org/ittf/PubliclyAvailableStandards/MPEG-DASH_schema_files/DASH-MPD-edition2.xsd
// We only model the elements and attributes that the normalization passes consume. Serde ignores
// unknown fields when deserializing, so the rest of a real-world manifest is simply skipped (enable
// the `warn_ignored_elements` feature to have them logged).
//
// We are using the quick_xml + serde crates to deserialize the XML content to Rust structs. Callers
// that use another lexer are free to build these structs programmatically: every struct implements
// Default.

#![allow(non_snake_case)]

use serde::{Serialize, Serializer, Deserialize};
use serde::de;
use serde_with::skip_serializing_none;
use regex::Regex;
use lazy_static::lazy_static;
use std::time::Duration;
use chrono::DateTime;
use crate::ManifestError;


/// Type representing an xs:dateTime, as per <https://www.w3.org/TR/xmlschema-2/#dateTime>
// Something like 2021-06-03T13:00:00Z
pub type XsDatetime = DateTime<chrono::offset::Utc>;


lazy_static! {
    static ref XS_DURATION_RE: Regex = Regex::new(concat!(r"^(?P<sign>[+-])?P",
                                                          r"(?:(?P<years>\d+)Y)?",
                                                          r"(?:(?P<months>\d+)M)?",
                                                          r"(?:(?P<weeks>\d+)W)?",
                                                          r"(?:(?P<days>\d+)D)?",
                                                          r"(?:(?P<hastime>T)", // time part must begin with a T
                                                          r"(?:(?P<hours>\d+)H)?",
                                                          r"(?:(?P<minutes>\d+)M)?",
                                                          r"(?:(?P<seconds>\d+)(?:(?P<nanoseconds>[.,]\d+)?)S)?",
                                                          r")?"))
        .unwrap();
}

fn duration_component(m: &regex::Captures, name: &str, unit_secs: u64) -> Result<u64, ManifestError> {
    match m.name(name) {
        Some(s) => {
            let n = s.as_str().parse::<u64>()
                .map_err(|_| ManifestError::InvalidDuration(format!("invalid {name} component")))?;
            Ok(n * unit_secs)
        },
        None => Ok(0),
    }
}

// Parse an XML duration string, as per https://www.w3.org/TR/xmlschema-2/#duration
//
// The lexical representation for duration is the ISO 8601 extended format PnYn MnDTnH nMnS, where
// nY represents the number of years, nM the number of months, nD the number of days, 'T' is the
// date/time separator, nH the number of hours, nM the number of minutes and nS the number of
// seconds. The number of seconds can include decimal digits to arbitrary precision.
//
// Examples: "PT0H0M30.030S", "PT1.2S", PT1004199059S, PT130S
//
// Limitations: we can't represent negative durations (leading "-" character) due to the choice of a
// std::time::Duration. We only accept fractional parts of seconds, and reject for example "P0.5Y" and "PT2.3H".
pub fn parse_xs_duration(s: &str) -> Result<Duration, ManifestError> {
    let m = XS_DURATION_RE.captures(s)
        .ok_or_else(|| ManifestError::InvalidDuration(format!("couldn't parse XS duration {s}")))?;
    if m.name("hastime").is_none() &&
        m.name("years").is_none() &&
        m.name("months").is_none() &&
        m.name("weeks").is_none() &&
        m.name("days").is_none() {
            return Err(ManifestError::InvalidDuration("empty".to_string()));
        }
    if let Some(s) = m.name("sign") {
        if s.as_str() == "-" {
            return Err(ManifestError::InvalidDuration("can't represent negative durations".to_string()));
        }
    }
    let mut nsecs: u32 = 0;
    if let Some(s) = m.name("nanoseconds") {
        let mut s = &s.as_str()[1..]; // drop initial "."
        if s.len() > 9 {
            s = &s[..9];
        }
        let padded = format!("{s:0<9}");
        nsecs = padded.parse::<u32>()
            .map_err(|_| ManifestError::InvalidDuration(String::from("invalid fractional seconds")))?;
    }
    let secs = duration_component(&m, "seconds", 1)?
        + duration_component(&m, "minutes", 60)?
        + duration_component(&m, "hours", 60 * 60)?
        + duration_component(&m, "days", 60 * 60 * 24)?
        + duration_component(&m, "weeks", 60 * 60 * 24 * 7)?
        + duration_component(&m, "months", 60 * 60 * 24 * 30)?
        + duration_component(&m, "years", 60 * 60 * 24 * 365)?;
    Ok(Duration::new(secs, nsecs))
}

// Deserialize an optional XML duration string to an Option<Duration>. This is a little trickier
// than deserializing a required field with serde.
fn deserialize_xs_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: de::Deserializer<'de>,
{
    match <Option<String>>::deserialize(deserializer) {
        Ok(optstring) => match optstring {
            Some(xs) => match parse_xs_duration(&xs) {
                Ok(d) => Ok(Some(d)),
                Err(e) => Err(de::Error::custom(e)),
            },
            None => Ok(None),
        },
        // the field isn't present, return an Ok(None)
        Err(_) => Ok(None),
    }
}

fn serialize_xs_duration<S>(oxs: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    // this is a very simple-minded way of converting to an ISO 8601 duration
    if let Some(xs) = oxs {
        let secs = xs.as_secs();
        let ms = xs.subsec_millis();
        serializer.serialize_str(&format!("PT{secs}.{ms:03}S"))
    } else {
        // in fact this won't be called because of the #[skip_serializing_none] annotation
        serializer.serialize_none()
    }
}


/// Describes a sequence of contiguous Segments with identical duration.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct S {
    /// time
    #[serde(rename = "@t")]
    pub t: Option<i64>,
    /// the duration (shall not exceed the value of MPD@maxSegmentDuration)
    #[serde(rename = "@d")]
    pub d: i64,
    /// the repeat count (number of contiguous Segments with identical MPD duration minus one),
    /// defaulting to zero if not present. A negative value means "repeat until the next S element
    /// or the end of the Period".
    #[serde(rename = "@r")]
    pub r: Option<i64>,
}

/// Contains a sequence of `S` elements, each of which describes a sequence of contiguous segments of
/// identical duration.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentTimeline {
    #[serde(rename = "S")]
    pub segments: Vec<S>,
}

#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Initialization {
    #[serde(rename = "@sourceURL")]
    pub sourceURL: Option<String>,
    #[serde(rename = "@range")]
    pub range: Option<String>,
}

/// Allows template-based `SegmentURL` construction. Specifies various substitution rules using
/// dynamic values such as `$Time$` and `$Number$` that map to a sequence of Segments.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentTemplate {
    #[serde(rename = "@initialization")]
    pub initialization: Option<String>,
    #[serde(rename = "@media")]
    pub media: Option<String>,
    #[serde(rename = "@index")]
    pub index: Option<String>,
    pub SegmentTimeline: Option<SegmentTimeline>,
    #[serde(rename = "@startNumber")]
    pub startNumber: Option<u64>,
    // note: ISO/IEC 23009-1 says this is an unsigned int, not an xs:duration. In practice, some manifests
    // use a floating point value (eg.
    // https://dash.akamaized.net/akamai/bbb_30fps/bbb_with_multiple_tiled_thumbnails.mpd)
    #[serde(rename = "@duration")]
    pub duration: Option<f64>,
    #[serde(rename = "@timescale")]
    pub timescale: Option<u64>,
    #[serde(rename = "@presentationTimeOffset")]
    pub presentationTimeOffset: Option<u64>,
    #[serde(rename = "@availabilityTimeOffset")]
    pub availabilityTimeOffset: Option<f64>,
}

impl SegmentTemplate {
    /// Fill in every attribute missing from `self` with the value declared by a template on an
    /// enclosing element (Period or AdaptationSet).
    pub fn inherit_from(&self, parent: &SegmentTemplate) -> SegmentTemplate {
        SegmentTemplate {
            initialization: self.initialization.clone().or_else(|| parent.initialization.clone()),
            media: self.media.clone().or_else(|| parent.media.clone()),
            index: self.index.clone().or_else(|| parent.index.clone()),
            SegmentTimeline: self.SegmentTimeline.clone().or_else(|| parent.SegmentTimeline.clone()),
            startNumber: self.startNumber.or(parent.startNumber),
            duration: self.duration.or(parent.duration),
            timescale: self.timescale.or(parent.timescale),
            presentationTimeOffset: self.presentationTimeOffset.or(parent.presentationTimeOffset),
            availabilityTimeOffset: self.availabilityTimeOffset.or(parent.availabilityTimeOffset),
        }
    }
}

/// A URI string to which a new request for an updated manifest should be made. This feature is
/// intended for servers and clients that can't use sticky HTTP redirects.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Location {
    #[serde(rename = "$text")]
    pub url: String,
}

/// A URI string that specifies one or more common locations for Segments and other resources.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BaseURL {
    #[serde(rename = "$text")]
    pub base: String,
    /// Elements with the same `@serviceLocation` value are likely to have their URLs resolve to
    /// services at a common network location, for example the same CDN.
    #[serde(rename = "@serviceLocation")]
    pub serviceLocation: Option<String>,
}

/// Specifies some common information concerning media segments.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentBase {
    #[serde(rename = "Initialization")]
    pub initialization: Option<Initialization>,
    #[serde(rename = "@timescale")]
    pub timescale: Option<u64>,
    #[serde(rename = "@presentationTimeOffset")]
    pub presentationTimeOffset: Option<u64>,
    #[serde(rename = "@indexRange")]
    pub indexRange: Option<String>,
}

/// The URL of a media segment.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentURL {
    #[serde(rename = "@media")]
    pub media: Option<String>, // actually an URI
    #[serde(rename = "@mediaRange")]
    pub mediaRange: Option<String>,
}

/// Contains a sequence of SegmentURL elements.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentList {
    // note: ISO/IEC 23009-1 says this is an unsigned int, not an xs:duration
    #[serde(rename = "@duration")]
    pub duration: Option<u64>,
    #[serde(rename = "@timescale")]
    pub timescale: Option<u64>,
    pub Initialization: Option<Initialization>,
    #[serde(rename = "SegmentURL")]
    pub segment_urls: Vec<SegmentURL>,
}

/// A generic descriptor (`DescriptorType` in the schema): a URI identifying a scheme, and an
/// optional value whose meaning is defined by that scheme.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Descriptor {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
}

/// Specifies the accessibility scheme used by the media content.
pub type Accessibility = Descriptor;

/// The purpose of this media stream, such as captions, subtitle, main, alternate, supplementary,
/// commentary, and dub.
pub type Role = Descriptor;

pub type EssentialProperty = Descriptor;

pub type SupplementalProperty = Descriptor;

/// A Common Encryption "Protection System Specific Header" box. Content is base64 encoded.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CencPssh {
    #[serde(rename = "$text")]
    pub content: Option<String>,
}

/// Contains information on DRM (rights management / encryption) mechanisms used in the stream, such
/// as Widevine and Playready. A ContentProtection element can publish itself for later reuse with
/// `@refId`, and another element can pull in those properties by declaring the same identifier in
/// its `@ref` attribute.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ContentProtection {
    #[serde(rename = "@refId")]
    pub refId: Option<String>,
    #[serde(rename = "@ref")]
    pub cpref: Option<String>,
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
    // the DRM key identifier
    #[serde(rename = "@cenc:default_KID", alias = "@default_KID")]
    pub default_KID: Option<String>,
    // In fact will be cenc:pssh, where cenc is the urn:mpeg:cenc:2013 XML namespace, but the serde
    // crate doesn't support XML namespaces
    #[serde(rename = "cenc:pssh", alias = "pssh")]
    pub cenc_pssh: Vec<CencPssh>,
}

/// A DASH event.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Event {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    #[serde(rename = "@presentationTime")]
    pub presentationTime: Option<u64>,
    #[serde(rename = "@duration")]
    pub duration: Option<u64>,
    #[serde(rename = "@messageData")]
    pub messageData: Option<String>,
    #[serde(rename = "$text")]
    pub content: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EventStream {
    #[serde(rename = "@timescale")]
    pub timescale: Option<u64>,
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
    #[serde(rename = "Event")]
    pub event: Vec<Event>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Label {
    #[serde(rename = "$text")]
    pub content: String,
}

/// A representation describes a version of the content, using a specific encoding and bitrate.
/// Streams often have multiple representations with different bitrates, to allow the client to
/// select that most suitable to its network conditions.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Representation {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    // ISO/IEC 23009-1 says that @mimeType is mandatory, but it's not always present on
    // akamaized.net MPDs
    #[serde(rename = "@mimeType")]
    pub mimeType: Option<String>,
    /// An RFC6381 string, <https://tools.ietf.org/html/rfc6381>
    #[serde(rename = "@codecs")]
    pub codecs: Option<String>,
    /// Enhancement-layer codecs (for example Dolby Vision on top of HEVC), whitespace separated.
    #[serde(rename = "@scte214:supplementalCodecs", alias = "@supplementalCodecs")]
    pub supplementalCodecs: Option<String>,
    #[serde(rename = "@contentType")]
    pub contentType: Option<String>,
    #[serde(rename = "@frameRate")]
    pub frameRate: Option<String>, // can be something like "15/2"
    #[serde(rename = "@bandwidth")]
    pub bandwidth: Option<u64>,
    #[serde(rename = "@width")]
    pub width: Option<u64>,
    #[serde(rename = "@height")]
    pub height: Option<u64>,
    #[serde(rename = "@audioSamplingRate")]
    pub audioSamplingRate: Option<String>,
    pub BaseURL: Vec<BaseURL>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    pub SegmentBase: Option<SegmentBase>,
    pub SegmentList: Option<SegmentList>,
    pub ContentProtection: Vec<ContentProtection>,
    pub EssentialProperty: Vec<EssentialProperty>,
    pub SupplementalProperty: Vec<SupplementalProperty>,
}

/// Contains a set of Representations. For example, if multiple language streams are available for
/// the audio content, each one can be in its own AdaptationSet.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AdaptationSet {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    pub Label: Option<Label>,
    pub BaseURL: Vec<BaseURL>,
    #[serde(rename = "@group")]
    pub group: Option<i64>,
    #[serde(rename = "@selectionPriority")]
    pub selectionPriority: Option<u64>,
    // eg "audio", "video", "text"
    #[serde(rename = "@contentType")]
    pub contentType: Option<String>,
    /// Content language, in RFC 5646 format
    #[serde(rename = "@lang")]
    pub lang: Option<String>,
    #[serde(rename = "@profiles")]
    pub profiles: Option<String>,
    // eg "video/mp4"
    #[serde(rename = "@mimeType")]
    pub mimeType: Option<String>,
    /// An RFC6381 string, <https://tools.ietf.org/html/rfc6381> (eg. "avc1.4D400C")
    #[serde(rename = "@codecs")]
    pub codecs: Option<String>,
    #[serde(rename = "@scte214:supplementalCodecs", alias = "@supplementalCodecs")]
    pub supplementalCodecs: Option<String>,
    #[serde(rename = "@frameRate")]
    pub frameRate: Option<String>, // it can be something like "15/2"
    #[serde(rename = "@width")]
    pub width: Option<u64>,
    #[serde(rename = "@height")]
    pub height: Option<u64>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    pub SegmentBase: Option<SegmentBase>,
    pub SegmentList: Option<SegmentList>,
    pub ContentProtection: Vec<ContentProtection>,
    pub Accessibility: Vec<Accessibility>,
    pub Role: Vec<Role>,
    pub EssentialProperty: Vec<EssentialProperty>,
    pub SupplementalProperty: Vec<SupplementalProperty>,
    #[serde(rename = "Representation")]
    pub representations: Vec<Representation>,
}

/// Describes a chunk of the content with a start time and a duration. Content can be split up into
/// multiple periods (such as chapters, advertising segments).
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Period {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    // note: ISO/IEC 23009-1 says that both of these are an xs:duration, not an unsigned int as for other
    // "duration" fields
    #[serde(rename = "@start")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub start: Option<Duration>,
    #[serde(rename = "@duration")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub duration: Option<Duration>,
    pub BaseURL: Vec<BaseURL>,
    /// A "remote resource", following the XML Linking Language (XLink) specification.
    #[serde(rename = "@xlink:href", alias = "@href")]
    pub href: Option<String>,
    #[serde(rename = "@xlink:actuate", alias = "@actuate")]
    pub actuate: Option<String>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    /// Descriptors declared at Period level can only serve as `@refId` targets.
    pub ContentProtection: Vec<ContentProtection>,
    #[serde(rename = "AdaptationSet")]
    pub adaptations: Vec<AdaptationSet>,
    #[serde(rename = "EventStream")]
    pub event_streams: Vec<EventStream>,
}

#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UTCTiming {
    // prefixed with urn:mpeg:dash:utc, one of http-xsdate:2014, http-iso:2014,
    // http-ntp:2014, ntp:2014, http-head:2014, direct:2014
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
}

/// The root node of a parsed DASH MPD manifest.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MPD {
    /// The Presentation Type, either "static" or "dynamic" (a live stream for which segments become
    /// available over time).
    #[serde(rename = "@type")]
    pub mpdtype: Option<String>,
    #[serde(rename = "@profiles")]
    pub profiles: Option<String>,
    #[serde(rename = "@minBufferTime")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub minBufferTime: Option<Duration>,
    #[serde(rename = "@minimumUpdatePeriod")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub minimumUpdatePeriod: Option<Duration>,
    #[serde(rename = "@timeShiftBufferDepth")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub timeShiftBufferDepth: Option<Duration>,
    #[serde(rename = "@mediaPresentationDuration")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub mediaPresentationDuration: Option<Duration>,
    #[serde(rename = "@maxSegmentDuration")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub maxSegmentDuration: Option<Duration>,
    /// A suggested delay of the presentation compared to the Live edge.
    #[serde(rename = "@suggestedPresentationDelay")]
    #[serde(deserialize_with = "deserialize_xs_duration", default)]
    #[serde(serialize_with = "serialize_xs_duration")]
    pub suggestedPresentationDelay: Option<Duration>,
    #[serde(rename = "@publishTime")]
    pub publishTime: Option<XsDatetime>,
    #[serde(rename = "@availabilityStartTime")]
    pub availabilityStartTime: Option<XsDatetime>,
    #[serde(rename = "@availabilityEndTime")]
    pub availabilityEndTime: Option<XsDatetime>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
    /// There may be several BaseURLs, for redundancy (for example multiple CDNs)
    #[serde(rename = "BaseURL")]
    pub base_url: Vec<BaseURL>,
    #[serde(rename = "Location")]
    pub locations: Vec<Location>,
    pub UTCTiming: Vec<UTCTiming>,
    pub ContentProtection: Vec<ContentProtection>,
    #[serde(rename = "EssentialProperty")]
    pub essential_property: Vec<EssentialProperty>,
    #[serde(rename = "SupplementalProperty")]
    pub supplemental_property: Vec<SupplementalProperty>,
}

impl MPD {
    pub fn is_dynamic(&self) -> bool {
        self.mpdtype.as_deref() == Some("dynamic")
    }
}


/// Parse an MPD manifest, provided as an XML string, returning an `MPD` node.
pub fn parse(xml: &str) -> Result<MPD, ManifestError> {
    #[cfg(feature = "warn_ignored_elements")]
    {
        let xd = &mut quick_xml::de::Deserializer::from_str(xml);
        let _: MPD = serde_ignored::deserialize(xd, |path| {
            tracing::warn!("Unused XML element in manifest: {path}");
        }).map_err(|e| ManifestError::Parsing(e.to_string()))?;
    }
    let xd = &mut quick_xml::de::Deserializer::from_str(xml);
    let mpd: MPD = serde_path_to_error::deserialize(xd)
        .map_err(|e| ManifestError::Parsing(e.to_string()))?;
    Ok(mpd)
}

// The body of a remote element may hold any number of sibling Period elements (including zero),
// which is not a well-formed XML document. We wrap it in a synthetic root before deserializing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemotePeriods {
    #[serde(rename = "Period")]
    periods: Vec<Period>,
}

/// Parse the content of a remote (XLinked) Period resource, which contains zero or more `Period`
/// elements.
pub fn parse_xlink_periods(xml: &str) -> Result<Vec<Period>, ManifestError> {
    let mut body = xml.trim_start();
    if body.starts_with("<?xml") {
        body = match body.find("?>") {
            Some(end) => &body[end + 2..],
            None => return Err(ManifestError::Parsing(String::from("unterminated XML declaration"))),
        };
    }
    let wrapped = format!("<RemotePeriods>{body}</RemotePeriods>");
    let xd = &mut quick_xml::de::Deserializer::from_str(&wrapped);
    let remote: RemotePeriods = serde_path_to_error::deserialize(xd)
        .map_err(|e| ManifestError::Parsing(e.to_string()))?;
    Ok(remote.periods)
}


#[cfg(test)]
mod tests {
    #[test]
    fn test_parse_xs_duration() {
        use std::time::Duration;
        use super::parse_xs_duration;

        assert!(parse_xs_duration("").is_err());
        assert!(parse_xs_duration("foobles").is_err());
        assert!(parse_xs_duration("P").is_err());
        assert!(parse_xs_duration("1Y2M3DT4H5M6S").is_err()); // missing initial P
        assert!(parse_xs_duration("-PT4H").is_err());
        assert_eq!(parse_xs_duration("PT3H11M53S").ok(), Some(Duration::new(11513, 0)));
        assert_eq!(parse_xs_duration("PT0H10M0.00S").ok(), Some(Duration::new(600, 0)));
        assert_eq!(parse_xs_duration("PT1.5S").ok(), Some(Duration::new(1, 500_000_000)));
        assert_eq!(parse_xs_duration("PT0S").ok(), Some(Duration::new(0, 0)));
        assert_eq!(parse_xs_duration("PT344S").ok(), Some(Duration::new(344, 0)));
        assert_eq!(parse_xs_duration("PT72H").ok(), Some(Duration::new(72*60*60, 0)));
        assert_eq!(parse_xs_duration("P26W").ok(), Some(Duration::new(15724800, 0)));
        assert_eq!(parse_xs_duration("+PT4H").ok(), Some(Duration::new(14400, 0)));
        assert_eq!(parse_xs_duration("P1Y2M3DT4H5M6,7S").ok(), Some(Duration::new(36993906, 700_000_000)));
    }

    #[test]
    fn test_template_inheritance() {
        use super::SegmentTemplate;

        let parent = SegmentTemplate {
            timescale: Some(1000),
            duration: Some(2000.0),
            media: Some(String::from("$Number$.m4s")),
            ..Default::default()
        };
        let child = SegmentTemplate {
            timescale: Some(90000),
            ..Default::default()
        };
        let merged = child.inherit_from(&parent);
        assert_eq!(merged.timescale, Some(90000));
        assert_eq!(merged.duration, Some(2000.0));
        assert_eq!(merged.media.as_deref(), Some("$Number$.m4s"));
    }

    #[test]
    fn test_serialize_programmatic_tree() {
        use std::time::Duration;
        use super::{parse, Period, MPD};

        let mpd = MPD {
            mpdtype: Some(String::from("static")),
            mediaPresentationDuration: Some(Duration::from_millis(30_500)),
            periods: vec![Period {
                id: Some(String::from("p0")),
                duration: Some(Duration::from_secs(30)),
                ..Default::default()
            }],
            ..Default::default()
        };
        let xml = quick_xml::se::to_string(&mpd).unwrap();
        let reparsed = parse(&xml).unwrap();
        assert!(!reparsed.is_dynamic());
        assert_eq!(reparsed.mediaPresentationDuration, Some(Duration::from_millis(30_500)));
        assert_eq!(reparsed.periods.len(), 1);
        assert_eq!(reparsed.periods[0].duration, Some(Duration::from_secs(30)));
        assert_eq!(reparsed.periods[0].start, None);
    }

    #[test]
    fn test_parse_xlink_periods() {
        use super::parse_xlink_periods;

        let xml = r#"<?xml version="1.0"?>
          <Period id="ad-1" duration="PT10S"/>
          <Period id="ad-2" duration="PT5S"/>"#;
        let periods = parse_xlink_periods(xml).unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[1].id.as_deref(), Some("ad-2"));
        assert!(parse_xlink_periods("").unwrap().is_empty());
    }
}
