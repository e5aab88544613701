use crate::storage::StoreKey;

/// The consolidated metadata key of Zarr V2.
pub const ZMETADATA: &str = ".zmetadata";
/// The group metadata key of Zarr V2.
pub const ZGROUP: &str = ".zgroup";
/// The array metadata key of Zarr V2.
pub const ZARRAY: &str = ".zarray";
/// The attributes key of Zarr V2.
pub const ZATTRS: &str = ".zattrs";
/// The metadata key of Zarr V3, holding consolidated metadata at the root.
pub const ZARR_JSON: &str = "zarr.json";

/// The class of a key of a reference manifest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// The consolidated metadata (`.zmetadata`).
    Consolidated,
    /// The root group metadata (`.zgroup`).
    GroupRoot,
    /// The metadata of a nested group (`a/.zgroup`).
    Group,
    /// The metadata of an array (`a/.zarray`).
    Array,
    /// Attributes of a group or array (`.zattrs`, `a/.zattrs`).
    Attributes,
    /// Zarr V3 node metadata (`zarr.json`, `a/zarr.json`).
    NamespacedConsolidated,
    /// Chunk data.
    Data,
}

impl KeyClass {
    /// Returns true if keys of this class are metadata.
    #[must_use]
    pub const fn is_metadata(&self) -> bool {
        !matches!(self, Self::Data)
    }
}

/// Classify `key` by its last path component.
#[must_use]
pub fn classify_key(key: &StoreKey) -> KeyClass {
    match key.name() {
        ZMETADATA => KeyClass::Consolidated,
        ZGROUP if key.parent().is_none() => KeyClass::GroupRoot,
        ZGROUP => KeyClass::Group,
        ZARRAY => KeyClass::Array,
        ZATTRS => KeyClass::Attributes,
        ZARR_JSON => KeyClass::NamespacedConsolidated,
        _ => KeyClass::Data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(key: &str) -> KeyClass {
        classify_key(&StoreKey::new(key).unwrap())
    }

    #[test]
    fn key_classes() {
        assert_eq!(classify(".zmetadata"), KeyClass::Consolidated);
        assert_eq!(classify(".zgroup"), KeyClass::GroupRoot);
        assert_eq!(classify("sub/.zgroup"), KeyClass::Group);
        assert_eq!(classify("tas/.zarray"), KeyClass::Array);
        assert_eq!(classify(".zattrs"), KeyClass::Attributes);
        assert_eq!(classify("tas/.zattrs"), KeyClass::Attributes);
        assert_eq!(classify("zarr.json"), KeyClass::NamespacedConsolidated);
        assert_eq!(classify("tas/zarr.json"), KeyClass::NamespacedConsolidated);
        assert_eq!(classify("tas/0.0.0"), KeyClass::Data);
        assert_eq!(classify("tas/c/0/0"), KeyClass::Data);
        // Only the last component decides
        assert_eq!(classify(".zarray/0"), KeyClass::Data);
        assert_eq!(classify("tas/.zarray.bak"), KeyClass::Data);
        assert!(!KeyClass::Data.is_metadata());
        assert!(KeyClass::GroupRoot.is_metadata());
    }
}
