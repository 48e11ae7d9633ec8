// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inline ID machinery for jobs, captcha challenges, and sessions.
//!
//! Generated IDs are `{4-char prefix}{19-char nanoid}`, which pins every
//! ID to exactly [`ID_MAX_LEN`] ASCII bytes. That fixed bound is what
//! lets [`IdBuf`] hold IDs inline and `Copy`, so the registry and the
//! captcha store key their maps by value, without allocation, and still
//! look entries up by `&str`.

/// Byte length of a generated ID, and the inline buffer capacity.
/// `from_string` accepts shorter inputs but debug-asserts the bound.
pub const ID_MAX_LEN: usize = 23;

/// An ID held inline: at most 23 ASCII bytes, `Copy`, map-key friendly.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdBuf {
    len: u8,
    buf: [u8; ID_MAX_LEN],
}

impl IdBuf {
    pub fn new(s: &str) -> Self {
        debug_assert!(
            s.len() <= ID_MAX_LEN,
            "ID longer than {} bytes ({}): {:?}",
            ID_MAX_LEN,
            s.len(),
            s,
        );
        let len = s.len().min(ID_MAX_LEN);
        let mut buf = [0u8; ID_MAX_LEN];
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        // Construction only ever copies out of a &str, so the active
        // bytes stay valid UTF-8.
        match std::str::from_utf8(&self.buf[..self.len as usize]) {
            Ok(s) => s,
            Err(_) => unreachable!("IdBuf holds non-UTF-8"),
        }
    }
}

impl std::hash::Hash for IdBuf {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Only the active bytes, to agree with str::hash; Borrow<str>
        // map lookups depend on the two hashing identically.
        self.as_str().hash(state);
    }
}

impl std::borrow::Borrow<str> for IdBuf {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Debug for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for IdBuf {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for IdBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Owned, not borrowed: IDs also arrive through non-borrowing
        // sources such as serde_json::Value.
        let s = String::deserialize(deserializer)?;
        if s.len() > ID_MAX_LEN {
            return Err(serde::de::Error::custom(format!(
                "ID exceeds {} bytes: {:?}",
                ID_MAX_LEN, s
            )));
        }
        Ok(IdBuf::new(&s))
    }
}

/// Define a newtype ID wrapper around [`IdBuf`] with a type prefix.
///
/// Generates exactly the surface this crate tree calls: `new()` for
/// random generation, `from_string()` for parsing, `as_str()`, `Display`,
/// `PartialEq` against string slices, and `Borrow<str>` for map lookups.
///
/// The ID format is `{prefix}{nanoid}` where:
/// - `prefix`: 4 character type indicator (e.g., "job-", "cap-")
/// - `nanoid`: 19 character random ID
/// - Total: 23 characters (exactly fits [`IdBuf`] capacity)
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the ID type.
///     pub struct JobId("job-");
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $crate::id::IdBuf);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix
            pub fn new() -> Self {
                Self($crate::id::IdBuf::new(&format!(
                    "{}{}",
                    Self::PREFIX,
                    nanoid::nanoid!(19)
                )))
            }

            /// Create ID from existing string (for parsing/deserialization)
            pub fn from_string(id: impl AsRef<str>) -> Self {
                Self($crate::id::IdBuf::new(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_str())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0.as_str() == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
