// The value type carried by an I/O variable (§3.1).
//
// A DataType is either fully allocated (both `initial` and `value` buffers
// present) or fully unallocated; there is no partial state. Structure is the
// one composite kind — its buffers hold child pointers rather than raw
// bytes, so it tracks its named sub-types separately and forbids the
// string-form initialization the scalar kinds support.

use crate::error::{ids, IslError, IslResult};
use crate::log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Real,
    Integer,
    Boolean,
    String,
}

#[derive(Debug, Clone)]
pub struct StructureField {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone)]
enum Shape {
    Scalar(DataKind),
    Structure(Vec<StructureField>),
}

/// A variable's value type: one of the four scalar kinds, sized by
/// cardinality, or a `Structure` composite (cardinality fixed at 1).
#[derive(Debug, Clone)]
pub struct DataType {
    shape: Shape,
    size: usize,
    initial: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
}

impl DataType {
    pub fn scalar(kind: DataKind, size: usize) -> Self {
        let size = size.max(1);
        Self { shape: Shape::Scalar(kind), size, initial: None, value: None }
    }

    pub fn structure(fields: Vec<StructureField>, size: usize) -> Self {
        if size > 1 {
            log::warning(ids::WARN_STRUCTURE_ARRAY_COERCED, "arrays of Structure are not supported; coercing size to 1");
        }
        Self { shape: Shape::Structure(fields), size: 1, initial: None, value: None }
    }

    pub fn is_structure(&self) -> bool {
        matches!(self.shape, Shape::Structure(_))
    }

    pub fn kind(&self) -> Option<DataKind> {
        match &self.shape {
            Shape::Scalar(k) => Some(*k),
            Shape::Structure(_) => None,
        }
    }

    pub fn fields(&self) -> &[StructureField] {
        match &self.shape {
            Shape::Structure(fields) => fields,
            Shape::Scalar(_) => &[],
        }
    }

    pub fn fields_mut(&mut self) -> &mut [StructureField] {
        match &mut self.shape {
            Shape::Structure(fields) => fields,
            Shape::Scalar(_) => &mut [],
        }
    }

    pub fn field(&self, name: &str) -> Option<&StructureField> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut StructureField> {
        self.fields_mut().iter_mut().find(|f| f.name == name)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes per element. Structure has no flat byte size of its own; callers
    /// sum `size_in_bytes` of its fields instead.
    pub fn size_of(&self) -> usize {
        match self.shape {
            Shape::Scalar(DataKind::Real) => 8,
            Shape::Scalar(DataKind::Integer) => 4,
            Shape::Scalar(DataKind::Boolean) => 1,
            Shape::Scalar(DataKind::String) => 1,
            Shape::Structure(_) => 0,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match &self.shape {
            Shape::Structure(fields) => fields.iter().map(|f| f.data_type.size_in_bytes()).sum(),
            Shape::Scalar(_) => self.size * self.size_of(),
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.initial.is_some() && self.value.is_some()
    }

    pub fn allocate(&mut self) {
        if self.is_allocated() {
            return;
        }
        let len = self.size_in_bytes();
        self.initial = Some(vec![0u8; len]);
        self.value = Some(vec![0u8; len]);
        if let Shape::Structure(fields) = &mut self.shape {
            for field in fields.iter_mut() {
                field.data_type.allocate();
            }
        }
    }

    pub fn free(&mut self) {
        self.initial = None;
        self.value = None;
        if let Shape::Structure(fields) = &mut self.shape {
            for field in fields.iter_mut() {
                field.data_type.free();
            }
        }
    }

    pub fn initial(&self) -> IslResult<&[u8]> {
        self.initial.as_deref().ok_or_else(|| unallocated())
    }

    pub fn value(&self) -> IslResult<&[u8]> {
        self.value.as_deref().ok_or_else(|| unallocated())
    }

    pub fn set_initial(&mut self, bytes: &[u8]) -> IslResult<()> {
        let buf = self.initial.as_mut().ok_or_else(unallocated)?;
        if buf.len() != bytes.len() {
            return Err(IslError::shape(ids::STRUCT_SIZE_NOT_ONE, "initial buffer size mismatch"));
        }
        buf.copy_from_slice(bytes);
        Ok(())
    }

    pub fn set_value(&mut self, bytes: &[u8]) -> IslResult<()> {
        let buf = self.value.as_mut().ok_or_else(unallocated)?;
        if buf.len() != bytes.len() {
            return Err(IslError::shape(ids::STRUCT_SIZE_NOT_ONE, "value buffer size mismatch"));
        }
        buf.copy_from_slice(bytes);
        Ok(())
    }

    /// Seed `initial` from a textual literal (scalar kinds only).
    pub fn set_initial_from_str(&mut self, text: &str) -> IslResult<()> {
        if self.is_structure() {
            return Err(IslError::shape(ids::STRUCT_FIELD_MISSING, "Structure cannot be initialized from a string literal"));
        }
        let bytes = encode_scalar_str(self.kind().unwrap(), text)?;
        self.set_initial(&bytes)
    }

    /// Assemble the flat `value` buffer from each child field's own buffer.
    /// Structure's flat buffer is what actually crosses the channel; this
    /// must run before handing that buffer to the channel on a write.
    pub fn copy_struct_in(&mut self) -> IslResult<()> {
        let Shape::Structure(fields) = &self.shape else { return Ok(()) };
        let mut flat = self.value.take().ok_or_else(unallocated)?;
        let mut offset = 0usize;
        for field in fields {
            let len = field.data_type.size_in_bytes();
            let src = field.data_type.value()?;
            flat[offset..offset + len].copy_from_slice(src);
            offset += len;
        }
        self.value = Some(flat);
        Ok(())
    }

    /// Scatter the flat `value` buffer (just read off the channel) back into
    /// each child field's own buffer.
    pub fn copy_struct_out(&mut self) -> IslResult<()> {
        if !self.is_structure() {
            return Ok(());
        }
        let flat = self.value.as_ref().ok_or_else(unallocated)?.clone();
        let Shape::Structure(fields) = &mut self.shape else { return Ok(()) };
        let mut offset = 0usize;
        for field in fields.iter_mut() {
            let len = field.data_type.size_in_bytes();
            field.data_type.set_value(&flat[offset..offset + len])?;
            offset += len;
        }
        Ok(())
    }

    /// Set a named child field's value and resync the flat buffer (§4.3).
    pub fn set_field(&mut self, name: &str, bytes: &[u8]) -> IslResult<()> {
        if !self.is_structure() {
            return Err(IslError::shape(ids::STRUCT_FIELD_MISSING, "not a Structure"));
        }
        let field = self
            .field_mut(name)
            .ok_or_else(|| IslError::shape(ids::STRUCT_FIELD_MISSING, format!("no such field: {name}")))?;
        field.data_type.set_value(bytes)?;
        self.copy_struct_in()
    }

    /// Read a named child field's value, resyncing from the flat buffer
    /// first (the flat buffer is the side that channel reads actually land
    /// on).
    pub fn field_value(&mut self, name: &str) -> IslResult<Vec<u8>> {
        if !self.is_structure() {
            return Err(IslError::shape(ids::STRUCT_FIELD_MISSING, "not a Structure"));
        }
        self.copy_struct_out()?;
        let field = self
            .field(name)
            .ok_or_else(|| IslError::shape(ids::STRUCT_FIELD_MISSING, format!("no such field: {name}")))?;
        Ok(field.data_type.value()?.to_vec())
    }
}

/// The C ABI's type code for a scalar kind (§6.1): `0=Real, 1=Integer,
/// 2=Boolean, 3=String`. Legacy callers may send `3`/`4` for
/// Boolean/String; accepted by `kind_from_code` but never produced here.
pub fn type_code(kind: DataKind) -> i32 {
    match kind {
        DataKind::Real => 0,
        DataKind::Integer => 1,
        DataKind::Boolean => 2,
        DataKind::String => 3,
    }
}

/// Accepts the current numbering (`0..=3`); legacy callers sending the old
/// offset-by-one Boolean/String codes (`3`/`4`) are out of scope here and
/// should be remapped by the caller before reaching this function.
pub fn kind_from_code(code: i32) -> IslResult<DataKind> {
    match code {
        0 => Ok(DataKind::Real),
        1 => Ok(DataKind::Integer),
        2 => Ok(DataKind::Boolean),
        3 => Ok(DataKind::String),
        _ => Err(IslError::shape(ids::UNKNOWN_VAR_TYPE, "unknown variable type code")),
    }
}

fn unallocated() -> IslError {
    IslError::shape(ids::STRUCT_SIZE_NOT_ONE, "DataType is not allocated")
}

fn encode_scalar_str(kind: DataKind, text: &str) -> IslResult<Vec<u8>> {
    match kind {
        DataKind::Real => {
            let v: f64 = text.parse().map_err(|_| IslError::shape(ids::UNKNOWN_VAR_TYPE, "not a real literal"))?;
            Ok(v.to_le_bytes().to_vec())
        }
        DataKind::Integer => {
            let v: i32 = text.parse().map_err(|_| IslError::shape(ids::UNKNOWN_VAR_TYPE, "not an integer literal"))?;
            Ok(v.to_le_bytes().to_vec())
        }
        DataKind::Boolean => {
            let v = text.eq_ignore_ascii_case("true") || text == "1";
            Ok(vec![v as u8])
        }
        DataKind::String => Ok(text.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_allocate_sizes_buffers() {
        let mut dt = DataType::scalar(DataKind::Real, 4);
        assert!(!dt.is_allocated());
        dt.allocate();
        assert!(dt.is_allocated());
        assert_eq!(dt.size_in_bytes(), 32);
        assert_eq!(dt.initial().unwrap().len(), 32);
    }

    #[test]
    fn set_value_before_allocate_fails() {
        let mut dt = DataType::scalar(DataKind::Integer, 1);
        assert!(dt.set_value(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn structure_array_coerces_to_one() {
        let fields = vec![StructureField { name: "x".into(), data_type: DataType::scalar(DataKind::Real, 1) }];
        let dt = DataType::structure(fields, 5);
        assert_eq!(dt.size(), 1);
    }

    #[test]
    fn structure_rejects_string_initial() {
        let fields = vec![StructureField { name: "x".into(), data_type: DataType::scalar(DataKind::Real, 1) }];
        let mut dt = DataType::structure(fields, 1);
        assert!(dt.set_initial_from_str("3.0").is_err());
    }

    #[test]
    fn structure_allocate_cascades_to_fields() {
        let fields = vec![
            StructureField { name: "a".into(), data_type: DataType::scalar(DataKind::Real, 1) },
            StructureField { name: "b".into(), data_type: DataType::scalar(DataKind::Integer, 2) },
        ];
        let mut dt = DataType::structure(fields, 1);
        dt.allocate();
        assert_eq!(dt.size_in_bytes(), 8 + 8);
        assert!(dt.fields()[0].data_type.is_allocated());
    }

    #[test]
    fn structure_field_roundtrip_through_flat_buffer() {
        let fields = vec![
            StructureField { name: "a".into(), data_type: DataType::scalar(DataKind::Real, 1) },
            StructureField { name: "b".into(), data_type: DataType::scalar(DataKind::Integer, 1) },
        ];
        let mut dt = DataType::structure(fields, 1);
        dt.allocate();
        dt.set_field("a", &3.5f64.to_le_bytes()).unwrap();
        dt.set_field("b", &7i32.to_le_bytes()).unwrap();

        // The flat buffer is what crosses the channel; simulate a read by
        // scattering it back into the child fields from scratch.
        let flat = dt.value().unwrap().to_vec();
        assert_eq!(flat.len(), 8 + 4);
        dt.copy_struct_out().unwrap();
        assert_eq!(dt.field_value("a").unwrap(), 3.5f64.to_le_bytes());
        assert_eq!(dt.field_value("b").unwrap(), 7i32.to_le_bytes());
    }

    #[test]
    fn boolean_literal_roundtrip() {
        let mut dt = DataType::scalar(DataKind::Boolean, 1);
        dt.allocate();
        dt.set_initial_from_str("true").unwrap();
        assert_eq!(dt.initial().unwrap(), &[1u8]);
    }
}
