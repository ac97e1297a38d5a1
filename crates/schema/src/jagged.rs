//! Jagged (variable-shape) field specs (§3, §4.1)

use crate::canonical::FieldSpec;
use rowvault_core::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// For each field, the ordered dimension indices that vary per row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JaggedSpec {
    vary_dims: BTreeMap<String, Vec<usize>>,
}

impl JaggedSpec {
    pub fn new(vary_dims: BTreeMap<String, Vec<usize>>) -> Self {
        JaggedSpec { vary_dims }
    }

    pub fn is_jagged(&self, field: &str) -> bool {
        self.vary_dims.get(field).map_or(false, |d| !d.is_empty())
    }

    pub fn vary_dims(&self, field: &str) -> Option<&[usize]> {
        self.vary_dims.get(field).map(|v| v.as_slice())
    }

    /// Companion meta field name(s) for `field`: a single `{field}_len`
    /// for one varying dimension, `{field}_shape` for two or more.
    pub fn meta_names_for(&self, field: &str) -> Vec<String> {
        match self.vary_dims.get(field) {
            None => vec![],
            Some(dims) if dims.is_empty() => vec![],
            Some(dims) if dims.len() == 1 => vec![format!("{field}_len")],
            Some(_) => vec![format!("{field}_shape")],
        }
    }

    /// All meta field names in ASCII-sorted order, for hashing (§4.3).
    pub fn sorted_meta_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .vary_dims
            .keys()
            .flat_map(|f| self.meta_names_for(f))
            .collect();
        names.sort();
        names
    }

    /// Validate that every declared varying field exists in `fields` and
    /// that `vary_dims` indices are within the field's declared rank
    /// (§4.1).
    pub fn validate_against(&self, fields: &[FieldSpec]) -> Result<(), Error> {
        for (field_name, dims) in &self.vary_dims {
            let field = fields
                .iter()
                .find(|f| &f.name == field_name)
                .ok_or_else(|| {
                    Error::JaggedSpecError(format!(
                        "jagged field {field_name:?} not found in canonical dtype"
                    ))
                })?;
            let rank = field.shape.len().max(1);
            for &d in dims {
                if d >= rank {
                    return Err(Error::JaggedSpecError(format!(
                        "jagged field {field_name:?}: vary dim {d} out of range for rank {rank}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::FieldKind;

    fn field(name: &str, shape: Vec<usize>) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            kind: FieldKind::Float64,
            shape,
        }
    }

    #[test]
    fn one_varying_dim_uses_len_meta_name() {
        let mut m = BTreeMap::new();
        m.insert("seq".to_string(), vec![0]);
        let spec = JaggedSpec::new(m);
        assert_eq!(spec.meta_names_for("seq"), vec!["seq_len".to_string()]);
    }

    #[test]
    fn two_varying_dims_uses_shape_meta_name() {
        let mut m = BTreeMap::new();
        m.insert("patch".to_string(), vec![0, 1]);
        let spec = JaggedSpec::new(m);
        assert_eq!(spec.meta_names_for("patch"), vec!["patch_shape".to_string()]);
    }

    #[test]
    fn sorted_meta_names_are_ascii_sorted() {
        let mut m = BTreeMap::new();
        m.insert("zeta".to_string(), vec![0]);
        m.insert("alpha".to_string(), vec![0]);
        let spec = JaggedSpec::new(m);
        assert_eq!(
            spec.sorted_meta_names(),
            vec!["alpha_len".to_string(), "zeta_len".to_string()]
        );
    }

    #[test]
    fn validate_rejects_unknown_field() {
        let mut m = BTreeMap::new();
        m.insert("missing".to_string(), vec![0]);
        let spec = JaggedSpec::new(m);
        assert!(spec.validate_against(&[field("seq", vec![10])]).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_dim() {
        let mut m = BTreeMap::new();
        m.insert("seq".to_string(), vec![5]);
        let spec = JaggedSpec::new(m);
        assert!(spec.validate_against(&[field("seq", vec![10])]).is_err());
    }
}
