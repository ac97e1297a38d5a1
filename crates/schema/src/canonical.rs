//! Canonical row dtype: locking, widening, and compatibility (§4.1, §3)

use rowvault_core::error::Error;
use rowvault_core::limits::DEFAULT_MAX_UNICODE;
use rowvault_core::naming::validate_name;
use serde::{Deserialize, Serialize};

/// A canonical scalar kind. Once locked, a field's kind never narrows;
/// `Unicode` may widen in place up to the configured cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Int64,
    Float64,
    Bool,
    /// Fixed-width Unicode, `U{width}`.
    Unicode(u16),
}

impl FieldKind {
    /// The base dtype tag used in schema signatures (§4.3): `"U"` for
    /// Unicode regardless of width (width is excluded from the hash), the
    /// concrete dtype string otherwise.
    pub fn hash_tag(&self) -> &'static str {
        match self {
            FieldKind::Int64 => "<i8",
            FieldKind::Float64 => "<f8",
            FieldKind::Bool => "|b1",
            FieldKind::Unicode(_) => "U",
        }
    }

    pub fn is_unicode(&self) -> bool {
        matches!(self, FieldKind::Unicode(_))
    }
}

/// An incoming batch's view of a field's scalar kind, prior to
/// normalization against the canonical dtype. Mirrors the numeric kinds a
/// caller might hand in before `lock_from_first_batch`/`ensure_compatible`
/// normalize them to the four canonical kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingFieldKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    F32,
    F64,
    Bool,
    Unicode(u16),
}

impl IncomingFieldKind {
    fn normalize(self) -> FieldKind {
        match self {
            IncomingFieldKind::I8
            | IncomingFieldKind::I16
            | IncomingFieldKind::I32
            | IncomingFieldKind::I64
            | IncomingFieldKind::U8
            | IncomingFieldKind::U16
            | IncomingFieldKind::U32 => FieldKind::Int64,
            IncomingFieldKind::F32 | IncomingFieldKind::F64 => FieldKind::Float64,
            IncomingFieldKind::Bool => FieldKind::Bool,
            IncomingFieldKind::Unicode(w) => FieldKind::Unicode(w),
        }
    }

    fn is_numeric_castable_to(self, canon: FieldKind) -> bool {
        matches!(
            (self.normalize(), canon),
            (FieldKind::Int64, FieldKind::Int64) | (FieldKind::Float64, FieldKind::Float64) | (FieldKind::Bool, FieldKind::Bool)
        )
    }
}

/// A field as described by an incoming batch.
#[derive(Debug, Clone)]
pub struct IncomingFieldSpec {
    pub name: String,
    pub kind: IncomingFieldKind,
    pub shape: Vec<usize>,
}

/// A field in the locked canonical dtype. Field order is stable and
/// matches on-disk layout (§4.1 invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Fixed outer shape (empty for scalars); no nested sub-arrays beyond
    /// one level.
    pub shape: Vec<usize>,
}

/// The canonical structured record dtype for a dataset. `None` until
/// locked by the first ingested batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalDtype {
    fields: Option<Vec<FieldSpec>>,
    max_unicode_cap: usize,
}

impl CanonicalDtype {
    pub fn new(max_unicode_cap: usize) -> Self {
        CanonicalDtype {
            fields: None,
            max_unicode_cap: if max_unicode_cap == 0 {
                DEFAULT_MAX_UNICODE
            } else {
                max_unicode_cap
            },
        }
    }

    pub fn is_locked(&self) -> bool {
        self.fields.is_some()
    }

    /// Restore an already-locked dtype, e.g. from a dataset's persisted
    /// schema JSON on reopen (§3, §6).
    pub fn from_locked(fields: Vec<FieldSpec>, max_unicode_cap: usize) -> Self {
        CanonicalDtype {
            fields: Some(fields),
            max_unicode_cap: if max_unicode_cap == 0 {
                DEFAULT_MAX_UNICODE
            } else {
                max_unicode_cap
            },
        }
    }

    pub fn fields(&self) -> Option<&[FieldSpec]> {
        self.fields.as_deref()
    }

    /// Lock the canonical dtype from the first observed batch, or return
    /// the already-locked dtype unchanged (§4.1).
    pub fn lock_from_first_batch(
        &mut self,
        incoming: &[IncomingFieldSpec],
    ) -> Result<&[FieldSpec], Error> {
        if let Some(ref fields) = self.fields {
            return Ok(fields);
        }
        let mut fields = Vec::with_capacity(incoming.len());
        for f in incoming {
            validate_name(&f.name)?;
            let kind = match f.kind {
                IncomingFieldKind::Unicode(w) => {
                    let clamped = w.min(self.max_unicode_cap as u16);
                    FieldKind::Unicode(clamped)
                }
                other => other.normalize(),
            };
            fields.push(FieldSpec {
                name: f.name.clone(),
                kind,
                shape: f.shape.clone(),
            });
        }
        self.fields = Some(fields);
        Ok(self.fields.as_deref().unwrap())
    }

    /// Ensure `incoming` can be safely cast to the locked canonical dtype,
    /// widening Unicode fields in place (within cap) when necessary.
    /// Returns `Ok(true)` if a widening warning should be emitted.
    pub fn ensure_compatible(&mut self, incoming: &[IncomingFieldSpec]) -> Result<bool, Error> {
        let fields = self
            .fields
            .as_mut()
            .ok_or_else(|| Error::CanonicalNotLocked("dtype not locked".into()))?;
        let mut widened = false;
        for inf in incoming {
            let canon = fields
                .iter_mut()
                .find(|f| f.name == inf.name)
                .ok_or_else(|| Error::DtypeMismatch(format!("unknown field {:?}", inf.name)))?;
            match (inf.kind, canon.kind) {
                (IncomingFieldKind::Unicode(w), FieldKind::Unicode(cw)) => {
                    if w > cw {
                        let cap = self.max_unicode_cap as u16;
                        if w > cap {
                            return Err(Error::UnicodeWideningRequired {
                                field: inf.name.clone(),
                                cap: cap as usize,
                                needed: w as usize,
                            });
                        }
                        canon.kind = FieldKind::Unicode(w.min(cap));
                        widened = true;
                    }
                }
                (other, canon_kind) => {
                    if !other.is_numeric_castable_to(canon_kind) {
                        return Err(Error::DtypeMismatch(format!(
                            "field {:?}: incoming {:?} cannot cast to canonical {:?}",
                            inf.name, other, canon_kind
                        )));
                    }
                }
            }
        }
        Ok(widened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(name: &str, kind: IncomingFieldKind) -> IncomingFieldSpec {
        IncomingFieldSpec {
            name: name.into(),
            kind,
            shape: vec![],
        }
    }

    #[test]
    fn locks_on_first_batch_and_ignores_later_batches() {
        let mut dt = CanonicalDtype::new(256);
        let first = vec![incoming("a", IncomingFieldKind::I32)];
        dt.lock_from_first_batch(&first).unwrap();
        assert_eq!(dt.fields().unwrap()[0].kind, FieldKind::Int64);

        let second = vec![incoming("b", IncomingFieldKind::F64)];
        let locked = dt.lock_from_first_batch(&second).unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].name, "a");
    }

    #[test]
    fn narrower_numeric_kinds_normalize_to_canonical_width() {
        let mut dt = CanonicalDtype::new(256);
        let batch = vec![
            incoming("i", IncomingFieldKind::U8),
            incoming("f", IncomingFieldKind::F32),
            incoming("b", IncomingFieldKind::Bool),
        ];
        let fields = dt.lock_from_first_batch(&batch).unwrap();
        assert_eq!(fields[0].kind, FieldKind::Int64);
        assert_eq!(fields[1].kind, FieldKind::Float64);
        assert_eq!(fields[2].kind, FieldKind::Bool);
    }

    #[test]
    fn unicode_widens_in_place_within_cap() {
        let mut dt = CanonicalDtype::new(16);
        dt.lock_from_first_batch(&[incoming("s", IncomingFieldKind::Unicode(4))])
            .unwrap();
        let widened = dt
            .ensure_compatible(&[incoming("s", IncomingFieldKind::Unicode(10))])
            .unwrap();
        assert!(widened);
        assert_eq!(dt.fields().unwrap()[0].kind, FieldKind::Unicode(10));
    }

    #[test]
    fn unicode_beyond_cap_fails_with_widening_required() {
        let mut dt = CanonicalDtype::new(8);
        dt.lock_from_first_batch(&[incoming("s", IncomingFieldKind::Unicode(4))])
            .unwrap();
        let err = dt
            .ensure_compatible(&[incoming("s", IncomingFieldKind::Unicode(20))])
            .unwrap_err();
        assert!(matches!(err, Error::UnicodeWideningRequired { .. }));
    }

    #[test]
    fn unicode_at_exactly_the_cap_is_accepted() {
        let mut dt = CanonicalDtype::new(8);
        dt.lock_from_first_batch(&[incoming("s", IncomingFieldKind::Unicode(8))])
            .unwrap();
        let widened = dt
            .ensure_compatible(&[incoming("s", IncomingFieldKind::Unicode(8))])
            .unwrap();
        assert!(!widened);
    }

    #[test]
    fn from_locked_restores_a_dtype_that_is_already_locked() {
        let dt = CanonicalDtype::from_locked(
            vec![FieldSpec {
                name: "a".into(),
                kind: FieldKind::Int64,
                shape: vec![],
            }],
            256,
        );
        assert!(dt.is_locked());
        assert_eq!(dt.fields().unwrap()[0].name, "a");
    }

    #[test]
    fn ensure_compatible_before_lock_is_an_error() {
        let mut dt = CanonicalDtype::new(256);
        let err = dt
            .ensure_compatible(&[incoming("a", IncomingFieldKind::I64)])
            .unwrap_err();
        assert!(matches!(err, Error::CanonicalNotLocked(_)));
    }

    #[test]
    fn incompatible_numeric_kind_is_rejected() {
        let mut dt = CanonicalDtype::new(256);
        dt.lock_from_first_batch(&[incoming("a", IncomingFieldKind::I64)])
            .unwrap();
        let err = dt
            .ensure_compatible(&[incoming("a", IncomingFieldKind::Bool)])
            .unwrap_err();
        assert!(matches!(err, Error::DtypeMismatch(_)));
    }
}
