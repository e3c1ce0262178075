//! The VB type system as seen by the IR.

use std::fmt;

use crate::pcode::PCodeType;

/// A VB data type.
///
/// `Variant` doubles as the "not yet known" type during lifting; type
/// recovery narrows it where the constraints allow. `Unknown` is reserved
/// for values the pipeline could not reason about at all and prints as
/// `Variant` in emitted source.
#[derive(Debug, Clone, PartialEq)]
pub enum IrType {
    /// No value (Sub return type).
    Void,
    /// 8-bit unsigned.
    Byte,
    /// True/False, stored as a 16-bit word.
    Boolean,
    /// 16-bit signed.
    Integer,
    /// 32-bit signed.
    Long,
    /// 32-bit float.
    Single,
    /// 64-bit float.
    Double,
    /// 64-bit scaled fixed point.
    Currency,
    /// Date/time value.
    Date,
    /// BSTR reference.
    String,
    /// Object reference.
    Object,
    /// 16-byte tagged union, the dynamic fallback.
    Variant,
    /// User-defined type, by name.
    UserDefined(String),
    /// Array of an element type with a dimension count.
    Array(Box<IrType>, usize),
    /// Completely unresolved.
    Unknown,
}

impl IrType {
    /// Storage size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self {
            IrType::Void | IrType::Unknown => 0,
            IrType::Byte => 1,
            IrType::Boolean | IrType::Integer => 2,
            IrType::Long
            | IrType::Single
            | IrType::String
            | IrType::Object
            | IrType::UserDefined(_)
            | IrType::Array(..) => 4,
            IrType::Double | IrType::Currency | IrType::Date => 8,
            IrType::Variant => 16,
        }
    }

    /// True for the arithmetic types.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            IrType::Byte
                | IrType::Integer
                | IrType::Long
                | IrType::Single
                | IrType::Double
                | IrType::Currency
        )
    }

    /// Widening rank: higher absorbs lower when unifying numeric types
    /// (Double > Single > Currency > Long > Integer > Byte).
    #[must_use]
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            IrType::Byte => Some(1),
            IrType::Integer => Some(2),
            IrType::Long => Some(3),
            IrType::Currency => Some(4),
            IrType::Single => Some(5),
            IrType::Double => Some(6),
            _ => None,
        }
    }

    /// The name used in emitted VB6 source. `Unknown` prints as `Variant`.
    #[must_use]
    pub fn vb_name(&self) -> String {
        match self {
            IrType::Void => "Void".to_string(),
            IrType::Byte => "Byte".to_string(),
            IrType::Boolean => "Boolean".to_string(),
            IrType::Integer => "Integer".to_string(),
            IrType::Long => "Long".to_string(),
            IrType::Single => "Single".to_string(),
            IrType::Double => "Double".to_string(),
            IrType::Currency => "Currency".to_string(),
            IrType::Date => "Date".to_string(),
            IrType::String => "String".to_string(),
            IrType::Object => "Object".to_string(),
            IrType::Variant | IrType::Unknown => "Variant".to_string(),
            IrType::UserDefined(name) => name.clone(),
            IrType::Array(element, _) => format!("{}()", element.vb_name()),
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.vb_name())
    }
}

impl From<PCodeType> for IrType {
    fn from(value: PCodeType) -> Self {
        match value {
            PCodeType::Byte => IrType::Byte,
            PCodeType::Boolean => IrType::Boolean,
            PCodeType::Integer => IrType::Integer,
            PCodeType::Long => IrType::Long,
            PCodeType::Single => IrType::Single,
            PCodeType::String => IrType::String,
            PCodeType::Object => IrType::Object,
            PCodeType::Variant | PCodeType::Unknown => IrType::Variant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(IrType::Boolean.size(), 2);
        assert_eq!(IrType::Integer.size(), 2);
        assert_eq!(IrType::Long.size(), 4);
        assert_eq!(IrType::Variant.size(), 16);
        assert_eq!(IrType::Double.size(), 8);
    }

    #[test]
    fn vb_names() {
        assert_eq!(IrType::Long.vb_name(), "Long");
        assert_eq!(IrType::Unknown.vb_name(), "Variant");
        assert_eq!(
            IrType::Array(Box::new(IrType::Integer), 2).vb_name(),
            "Integer()"
        );
        assert_eq!(IrType::UserDefined("POINTAPI".to_string()).vb_name(), "POINTAPI");
    }

    #[test]
    fn ranks_follow_widening_order() {
        let order = [
            IrType::Byte,
            IrType::Integer,
            IrType::Long,
            IrType::Currency,
            IrType::Single,
            IrType::Double,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].numeric_rank() < pair[1].numeric_rank());
        }
        assert_eq!(IrType::String.numeric_rank(), None);
    }
}
