//! Resolution of ContentProtection descriptors and of their `@ref`/`@refId` cross-references.
//
// Since the fifth edition of ISO/IEC 23009-1, a ContentProtection element can declare a `@refId`,
// and any other ContentProtection element may declare `@ref` with that same identifier to inherit
// the properties of the first one (typically to avoid repeating a large cenc:pssh payload in each
// AdaptationSet). The referenced element may appear before or after the referencing one in document
// order, so resolution is a small fixed-point computation: entries whose reference is not known yet
// are queued, retried each time a new reference is published, and forced through at the end of the
// parse with whatever information is available.

use std::collections::HashMap;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;
use crate::ir::ContentProtection;
use crate::ManifestWarning;


/// The `initDataType` of PSSH boxes, as registered by the W3C for Encrypted Media Extensions.
pub const CENC_INIT_DATA_TYPE: &str = "cenc";

/// One initialization payload for a given key system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDataValue {
    /// Key system identifier, as 32 lowercase hexadecimal digits (without dashes).
    pub system_id: String,
    pub data: Bytes,
}

/// All the initialization payloads of a given initialization data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub init_data_type: String,
    pub values: Vec<InitDataValue>,
}

/// Encryption-related information attached to a Representation. Both lists only ever grow: data
/// learned from a later refresh is merged in, never substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentProtectionData {
    pub key_ids: Vec<Bytes>,
    pub init_data: Vec<InitData>,
}

impl ContentProtectionData {
    /// Returns `true` if the key id was not already known.
    pub fn add_key_id(&mut self, key_id: Bytes) -> bool {
        if self.key_ids.contains(&key_id) {
            return false;
        }
        self.key_ids.push(key_id);
        true
    }

    /// Returns `true` if this (system id, payload) pair was not already known for that type.
    pub fn add_init_data(&mut self, init_data_type: &str, system_id: &str, data: Bytes) -> bool {
        let group = match self.init_data.iter_mut().position(|i| i.init_data_type == init_data_type) {
            Some(idx) => &mut self.init_data[idx],
            None => {
                self.init_data.push(InitData {
                    init_data_type: init_data_type.to_string(),
                    values: Vec::new(),
                });
                // just pushed, so the vector is not empty
                let last = self.init_data.len() - 1;
                &mut self.init_data[last]
            },
        };
        if group.values.iter().any(|v| v.system_id == system_id && v.data == data) {
            return false;
        }
        group.values.push(InitDataValue { system_id: system_id.to_string(), data });
        true
    }

    /// Merge all key ids and initialization data of `other` into `self`. Returns `true` if anything
    /// new was learned.
    pub fn merge(&mut self, other: &ContentProtectionData) -> bool {
        let mut changed = false;
        for kid in &other.key_ids {
            changed |= self.add_key_id(kid.clone());
        }
        for group in &other.init_data {
            for v in &group.values {
                changed |= self.add_init_data(&group.init_data_type, &v.system_id, v.data.clone());
            }
        }
        changed
    }

    pub fn init_data_for(&self, init_data_type: &str) -> Option<&InitData> {
        self.init_data.iter().find(|i| i.init_data_type == init_data_type)
    }
}


/// Identifies the Representation a ContentProtection descriptor should be attached to. Handed out by
/// [`ContentProtectionParser::new_slot`] while Representations are being normalized, and used once
/// parsing is finished to collect the resolved data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtectionSlot(usize);


/// Collects ContentProtection descriptors for the whole document and resolves their references.
#[derive(Debug, Default)]
pub struct ContentProtectionParser {
    refs: HashMap<String, ContentProtection>,
    pending: Vec<(ProtectionSlot, ContentProtection)>,
    data: Vec<Option<ContentProtectionData>>,
    warnings: Vec<ManifestWarning>,
}

impl ContentProtectionParser {
    pub fn new() -> ContentProtectionParser {
        ContentProtectionParser::default()
    }

    /// Reserve a slot for a Representation which may carry content protection data.
    pub fn new_slot(&mut self) -> ProtectionSlot {
        self.data.push(None);
        ProtectionSlot(self.data.len() - 1)
    }

    /// Register descriptors as reference targets only, without attaching them to any Representation
    /// (this is the case for ContentProtection elements at MPD or Period level).
    pub fn add_references(&mut self, cps: &[ContentProtection]) {
        let mut published = false;
        for cp in cps {
            if let Some(ref_id) = &cp.refId {
                self.refs.insert(ref_id.clone(), cp.clone());
                published = true;
            }
        }
        if published {
            self.process_pending(false);
        }
    }

    /// Attach a descriptor to the Representation identified by `slot`. If it references a
    /// descriptor which hasn't been seen yet, it is queued until that reference is published or
    /// until [`finalize`](Self::finalize) is called.
    pub fn add(&mut self, slot: ProtectionSlot, cp: &ContentProtection) {
        // Declaring the slot as protected even before resolution: the Representation is encrypted
        // whatever the outcome of the reference lookup.
        if let Some(entry) = self.data.get_mut(slot.0) {
            entry.get_or_insert_with(ContentProtectionData::default);
        }
        if !self.try_apply(slot, cp, false) {
            self.pending.push((slot, cp.clone()));
        }
        if let Some(ref_id) = &cp.refId {
            self.refs.insert(ref_id.clone(), cp.clone());
            self.process_pending(false);
        }
    }

    /// Force the resolution of all queued descriptors, applying whatever partial data they hold.
    /// Calling it more than once has no further effect. Returns the warnings produced by this call.
    pub fn finalize(&mut self) -> Vec<ManifestWarning> {
        let before = self.warnings.len();
        self.process_pending(true);
        self.warnings[before..].to_vec()
    }

    /// Number of descriptors still waiting for their reference to be published.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The resolved data for a slot, or `None` if no descriptor was ever attached to it.
    pub fn data_for(&self, slot: ProtectionSlot) -> Option<&ContentProtectionData> {
        self.data.get(slot.0).and_then(|d| d.as_ref())
    }

    /// All warnings produced so far.
    pub fn warnings(&self) -> &[ManifestWarning] {
        &self.warnings
    }

    fn process_pending(&mut self, force: bool) {
        let queued = std::mem::take(&mut self.pending);
        for (slot, cp) in queued {
            if !self.try_apply(slot, &cp, force) {
                self.pending.push((slot, cp));
            }
        }
    }

    // Returns false only when the descriptor depends on a reference that is unknown and we are not
    // forcing resolution.
    fn try_apply(&mut self, slot: ProtectionSlot, cp: &ContentProtection, force: bool) -> bool {
        let mut resolved = cp.clone();
        if let Some(reference) = &cp.cpref {
            match self.refs.get(reference) {
                Some(referenced) => inherit_referenced(&mut resolved, referenced),
                None => {
                    if !force {
                        return false;
                    }
                    warn!("ContentProtection reference {reference} not found, using the partial descriptor");
                    self.warnings.push(ManifestWarning::UnresolvedContentProtectionRef {
                        reference: reference.clone(),
                    });
                },
            }
        }
        let Some(entry) = self.data.get_mut(slot.0) else {
            return true;
        };
        let entry = entry.get_or_insert_with(ContentProtectionData::default);
        if let Some(kid) = &resolved.default_KID {
            match parse_key_id(kid) {
                Some(bytes) => {
                    entry.add_key_id(bytes);
                },
                None => warn!("Ignoring invalid ContentProtection default_KID {kid}"),
            }
        }
        if let Some(system_id) = resolved.schemeIdUri.as_deref().and_then(system_id_from_scheme) {
            for pssh in &resolved.cenc_pssh {
                let Some(content) = &pssh.content else { continue };
                let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
                match BASE64_STANDARD.decode(compact) {
                    Ok(data) => {
                        entry.add_init_data(CENC_INIT_DATA_TYPE, &system_id, Bytes::from(data));
                    },
                    Err(e) => warn!("Ignoring undecodable cenc:pssh for system {system_id}: {e}"),
                }
            }
        }
        true
    }
}

// The referencing element keeps the attributes it declares itself; missing ones are taken from the
// referenced element, and PSSH payloads of both are concatenated.
fn inherit_referenced(cp: &mut ContentProtection, referenced: &ContentProtection) {
    if cp.schemeIdUri.is_none() {
        cp.schemeIdUri = referenced.schemeIdUri.clone();
    }
    if cp.value.is_none() {
        cp.value = referenced.value.clone();
    }
    if cp.default_KID.is_none() {
        cp.default_KID = referenced.default_KID.clone();
    }
    cp.cenc_pssh.extend(referenced.cenc_pssh.iter().cloned());
}

/// Extract the key system id from a scheme URI of the form "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed".
pub fn system_id_from_scheme(scheme: &str) -> Option<String> {
    let uuid = scheme.get(..9)
        .filter(|prefix| prefix.eq_ignore_ascii_case("urn:uuid:"))
        .and_then(|_| scheme.get(9..))?;
    Uuid::parse_str(uuid.trim()).ok()
        .map(|u| u.simple().to_string())
}

/// Parse a key id such as "34e5db32-8625-47cd-ba06-68fca0655a72" to its 16 bytes.
pub fn parse_key_id(kid: &str) -> Option<Bytes> {
    Uuid::parse_str(kid.trim()).ok()
        .map(|u| Bytes::copy_from_slice(u.as_bytes()))
}
