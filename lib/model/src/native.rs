use crate::error::TermError;
use chrono::{DateTime, NaiveDateTime, Utc};
use oxrdf::vocab::xsd;
use oxrdf::{Literal, LiteralRef, NamedNode};
use oxsdatatypes::{Decimal, Double};
use std::cmp::Ordering;
use std::fmt;

/// A host scalar obtained by coercing a typed RDF literal.
///
/// The numeric variants follow the XSD casting hierarchy
/// (integer ⊂ decimal ⊂ double); comparisons between them promote to the
/// wider type. Datetimes are instants with an explicit time zone — naive
/// `xsd:dateTime` lexicals are interpreted as UTC.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl NativeValue {
    /// Coerces a typed literal into a native scalar.
    ///
    /// Fails with [TermError::TypeError] when no coercion is defined for the
    /// literal's datatype and [TermError::LexicalError] when the lexical form
    /// is not in the datatype's lexical space.
    pub fn from_literal(literal: LiteralRef<'_>) -> Result<NativeValue, TermError> {
        let datatype = literal.datatype();
        let lexical = literal.value();
        if datatype == xsd::BOOLEAN {
            return match lexical {
                "true" | "1" => Ok(NativeValue::Boolean(true)),
                "false" | "0" => Ok(NativeValue::Boolean(false)),
                _ => Err(TermError::lexical(lexical, datatype.into_owned())),
            };
        }
        if is_integer_datatype(datatype.as_str()) {
            return lexical
                .parse::<i64>()
                .map(NativeValue::Integer)
                .map_err(|_| TermError::lexical(lexical, datatype.into_owned()));
        }
        if datatype == xsd::DOUBLE || datatype == xsd::FLOAT {
            return lexical
                .parse::<f64>()
                .map(NativeValue::Double)
                .map_err(|_| TermError::lexical(lexical, datatype.into_owned()));
        }
        if datatype == xsd::DECIMAL {
            return lexical
                .parse::<Decimal>()
                .map(NativeValue::Decimal)
                .map_err(|_| TermError::lexical(lexical, datatype.into_owned()));
        }
        if datatype == xsd::STRING {
            return Ok(NativeValue::String(lexical.to_owned()));
        }
        if datatype == xsd::DATE_TIME || datatype == xsd::DATE_TIME_STAMP {
            return parse_date_time(lexical)
                .map(NativeValue::DateTime)
                .ok_or_else(|| TermError::lexical(lexical, datatype.into_owned()));
        }
        Err(TermError::TypeError {
            datatype: datatype.into_owned(),
        })
    }

    /// The XSD datatype a literal produced from this value carries.
    pub fn datatype(&self) -> NamedNode {
        match self {
            NativeValue::Boolean(_) => xsd::BOOLEAN.into_owned(),
            NativeValue::Integer(_) => xsd::INTEGER.into_owned(),
            NativeValue::Decimal(_) => xsd::DECIMAL.into_owned(),
            NativeValue::Double(_) => xsd::DOUBLE.into_owned(),
            NativeValue::String(_) => xsd::STRING.into_owned(),
            NativeValue::DateTime(_) => xsd::DATE_TIME.into_owned(),
        }
    }

    /// Renders the value as a typed literal in canonical form.
    pub fn to_literal(&self) -> Literal {
        match self {
            NativeValue::Boolean(b) => Literal::from(*b),
            NativeValue::Integer(i) => Literal::from(*i),
            NativeValue::Decimal(d) => {
                Literal::new_typed_literal(d.to_string(), xsd::DECIMAL)
            }
            NativeValue::Double(d) => Literal::from(*d),
            NativeValue::String(s) => Literal::new_simple_literal(s),
            NativeValue::DateTime(dt) => Literal::new_typed_literal(
                format_date_time(dt),
                xsd::DATE_TIME,
            ),
        }
    }

    /// The value as a double, when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NativeValue::Integer(i) => Some(*i as f64),
            NativeValue::Decimal(d) => Some(f64::from(Double::from(*d))),
            NativeValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Whether this value participates in numeric promotion.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            NativeValue::Integer(_) | NativeValue::Decimal(_) | NativeValue::Double(_)
        )
    }

    /// SPARQL effective boolean value.
    pub fn effective_boolean_value(&self) -> Option<bool> {
        match self {
            NativeValue::Boolean(b) => Some(*b),
            NativeValue::Integer(i) => Some(*i != 0),
            NativeValue::Decimal(d) => Some(*d != Decimal::from(0)),
            NativeValue::Double(d) => Some(*d != 0.0 && !d.is_nan()),
            NativeValue::String(s) => Some(!s.is_empty()),
            NativeValue::DateTime(_) => None,
        }
    }

    /// Value-space comparison with numeric promotion.
    ///
    /// Returns `None` for incomparable operand kinds.
    pub fn compare(&self, other: &NativeValue) -> Option<Ordering> {
        match (self, other) {
            (NativeValue::Boolean(l), NativeValue::Boolean(r)) => Some(l.cmp(r)),
            (NativeValue::String(l), NativeValue::String(r)) => Some(l.cmp(r)),
            (NativeValue::DateTime(l), NativeValue::DateTime(r)) => Some(l.cmp(r)),
            (NativeValue::Integer(l), NativeValue::Integer(r)) => Some(l.cmp(r)),
            (NativeValue::Decimal(l), NativeValue::Decimal(r)) => l.partial_cmp(r),
            (NativeValue::Integer(l), NativeValue::Decimal(r)) => {
                Decimal::from(*l).partial_cmp(r)
            }
            (NativeValue::Decimal(l), NativeValue::Integer(r)) => {
                l.partial_cmp(&Decimal::from(*r))
            }
            (l, r) if l.is_numeric() && r.is_numeric() => {
                l.as_f64()?.partial_cmp(&r.as_f64()?)
            }
            _ => None,
        }
    }
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Boolean(b) => b.fmt(f),
            NativeValue::Integer(i) => i.fmt(f),
            NativeValue::Decimal(d) => d.fmt(f),
            NativeValue::Double(d) => d.fmt(f),
            NativeValue::String(s) => s.fmt(f),
            NativeValue::DateTime(dt) => f.write_str(&format_date_time(dt)),
        }
    }
}

/// Parses an `xsd:dateTime` lexical form into a UTC instant.
///
/// Forms with an offset are normalized to UTC; naive forms are treated as
/// already being in UTC.
pub fn parse_date_time(lexical: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(lexical) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(lexical, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Canonical `xsd:dateTime` lexical form (UTC, `Z` suffix).
pub fn format_date_time(dt: &DateTime<Utc>) -> String {
    if dt.timestamp_subsec_nanos() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.fZ").to_string()
    }
}

fn is_integer_datatype(iri: &str) -> bool {
    iri == xsd::INTEGER.as_str()
        || iri == xsd::LONG.as_str()
        || iri == xsd::INT.as_str()
        || iri == xsd::SHORT.as_str()
        || iri == xsd::BYTE.as_str()
        || iri == xsd::UNSIGNED_LONG.as_str()
        || iri == xsd::UNSIGNED_INT.as_str()
        || iri == xsd::UNSIGNED_SHORT.as_str()
        || iri == xsd::UNSIGNED_BYTE.as_str()
        || iri == xsd::NON_NEGATIVE_INTEGER.as_str()
        || iri == xsd::NON_POSITIVE_INTEGER.as_str()
        || iri == xsd::POSITIVE_INTEGER.as_str()
        || iri == xsd::NEGATIVE_INTEGER.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::Literal;

    #[test]
    fn integer_family_coerces_to_i64() {
        let literal = Literal::new_typed_literal("42", xsd::UNSIGNED_INT);
        let value = NativeValue::from_literal(literal.as_ref()).unwrap();
        assert_eq!(value, NativeValue::Integer(42));
    }

    #[test]
    fn naive_date_time_is_utc() {
        let literal = Literal::new_typed_literal("2022-06-01T08:46:53", xsd::DATE_TIME);
        let NativeValue::DateTime(dt) =
            NativeValue::from_literal(literal.as_ref()).unwrap()
        else {
            panic!("expected a datetime");
        };
        assert_eq!(dt.to_rfc3339(), "2022-06-01T08:46:53+00:00");
        assert_eq!(format_date_time(&dt), "2022-06-01T08:46:53Z");
    }

    #[test]
    fn offset_date_time_normalizes_to_utc() {
        let literal =
            Literal::new_typed_literal("2022-06-01T10:46:53+02:00", xsd::DATE_TIME);
        let NativeValue::DateTime(dt) =
            NativeValue::from_literal(literal.as_ref()).unwrap()
        else {
            panic!("expected a datetime");
        };
        assert_eq!(format_date_time(&dt), "2022-06-01T08:46:53Z");
    }

    #[test]
    fn numeric_promotion_in_comparisons() {
        let int = NativeValue::Integer(3);
        let double = NativeValue::Double(3.5);
        assert_eq!(int.compare(&double), Some(Ordering::Less));

        let decimal = NativeValue::Decimal("3.0".parse().unwrap());
        assert_eq!(int.compare(&decimal), Some(Ordering::Equal));
    }

    #[test]
    fn undefined_coercion_is_a_type_error() {
        let literal = Literal::new_typed_literal("PT5S", xsd::DURATION);
        let err = NativeValue::from_literal(literal.as_ref()).unwrap_err();
        assert!(matches!(err, TermError::TypeError { .. }));
    }

    #[test]
    fn invalid_lexical_form_is_a_lexical_error() {
        let literal = Literal::new_typed_literal("not-a-number", xsd::INTEGER);
        let err = NativeValue::from_literal(literal.as_ref()).unwrap_err();
        assert!(matches!(err, TermError::LexicalError { .. }));
    }
}
