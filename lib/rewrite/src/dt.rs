//! Desugaring of the `DT { … }` time-series block.
//!
//! The block is plain syntactic sugar: it is cut out of the query text
//! before parsing and replaced by the equivalent algebra — the implicit
//! data-point triples, a filter clamping the timestamp, and, when an
//! interval and aggregations are requested, a bucketed group-by.

use crate::RewriteError;
use chrontext_model::vocab::ct;
use chrontext_model::{parse_date_time, xsd};
use oxrdf::{Literal, NamedNode, Variable};
use spargebra::algebra::{
    AggregateExpression, AggregateFunction, Expression, Function, GraphPattern,
};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use spargebra::Query;

/// Parses a query, desugaring a DT block when one is present.
pub fn parse_query(sparql: &str) -> Result<Query, RewriteError> {
    let Some((stripped, block)) = extract_dt_block(sparql)? else {
        return Ok(Query::parse(sparql, None)?);
    };
    let options = parse_options(&block)?;
    let query = Query::parse(&stripped, None)?;
    inject(query, &options)
}

#[derive(Debug, Default)]
struct DtOptions {
    timestamp: Option<Variable>,
    timeseries: Vec<Variable>,
    from: Option<String>,
    to: Option<String>,
    interval_seconds: Option<i64>,
    aggregations: Vec<String>,
}

/// Cuts the first `DT { … }` block out of the query text, respecting string
/// literals and nested braces. Returns the stripped text and the block
/// content.
fn extract_dt_block(sparql: &str) -> Result<Option<(String, String)>, RewriteError> {
    let bytes = sparql.as_bytes();
    let mut i = 0usize;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        match in_string {
            Some(quote) => {
                if c == b'\\' {
                    i += 1;
                } else if c == quote {
                    in_string = None;
                }
            }
            None => {
                if c == b'"' || c == b'\'' {
                    in_string = Some(c);
                } else if c == b'D'
                    && sparql[i..].starts_with("DT")
                    && boundary_before(bytes, i)
                {
                    let mut j = i + 2;
                    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j] == b'{' {
                        let end = matching_brace(sparql, j)?;
                        let mut stripped = String::with_capacity(sparql.len());
                        stripped.push_str(&sparql[..i]);
                        stripped.push_str(&sparql[end + 1..]);
                        let block = sparql[j + 1..end].to_owned();
                        return Ok(Some((stripped, block)));
                    }
                }
            }
        }
        i += 1;
    }
    Ok(None)
}

fn boundary_before(bytes: &[u8], i: usize) -> bool {
    if i == 0 {
        return true;
    }
    let prev = bytes[i - 1];
    prev.is_ascii_whitespace() || prev == b'{' || prev == b'.' || prev == b'}'
}

fn matching_brace(sparql: &str, open: usize) -> Result<usize, RewriteError> {
    let bytes = sparql.as_bytes();
    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    for (i, &c) in bytes.iter().enumerate().skip(open) {
        match in_string {
            Some(quote) => {
                if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                b'"' | b'\'' => in_string = Some(c),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            },
        }
    }
    Err(RewriteError::DtSyntax("unclosed brace".to_owned()))
}

#[derive(Debug, PartialEq)]
enum Token {
    Ident(String),
    Equals,
    Comma,
    Var(String),
    Str(String),
}

fn tokenize(block: &str) -> Result<Vec<Token>, RewriteError> {
    let mut tokens = Vec::new();
    let bytes = block.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c == b'=' {
            tokens.push(Token::Equals);
            i += 1;
        } else if c == b',' {
            tokens.push(Token::Comma);
            i += 1;
        } else if c == b'?' || c == b'$' {
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_')
            {
                j += 1;
            }
            if j == start {
                return Err(RewriteError::DtSyntax("empty variable name".to_owned()));
            }
            tokens.push(Token::Var(block[start..j].to_owned()));
            i = j;
        } else if c == b'"' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j] != b'"' {
                if bytes[j] == b'\\' {
                    j += 1;
                }
                j += 1;
            }
            if j >= bytes.len() {
                return Err(RewriteError::DtSyntax("unclosed string".to_owned()));
            }
            tokens.push(Token::Str(block[i + 1..j].to_owned()));
            i = j + 1;
            // A datatype suffix on a literal is allowed and ignored; the
            // option decides the interpretation.
            if block[i..].starts_with("^^") {
                i += 2;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && bytes[i] != b','
                {
                    i += 1;
                }
            }
        } else if c.is_ascii_alphabetic() {
            let start = i;
            let mut j = i;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_')
            {
                j += 1;
            }
            tokens.push(Token::Ident(block[start..j].to_owned()));
            i = j;
        } else {
            return Err(RewriteError::DtSyntax(format!(
                "unexpected character '{}'",
                c as char
            )));
        }
    }
    Ok(tokens)
}

fn parse_options(block: &str) -> Result<DtOptions, RewriteError> {
    let tokens = tokenize(block)?;
    let mut options = DtOptions::default();
    let mut i = 0usize;
    while i < tokens.len() {
        let Token::Ident(key) = &tokens[i] else {
            return Err(RewriteError::DtSyntax(format!(
                "expected an option name, found {:?}",
                tokens[i]
            )));
        };
        if tokens.get(i + 1) != Some(&Token::Equals) {
            return Err(RewriteError::DtSyntax(format!("missing '=' after {key}")));
        }
        i += 2;
        let mut values = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Var(_) | Token::Str(_) => {
                    values.push(&tokens[i]);
                    i += 1;
                    if tokens.get(i) == Some(&Token::Comma) {
                        // A comma continues the value list only if another
                        // value follows; `key =` starts the next option.
                        if matches!(
                            (tokens.get(i + 1), tokens.get(i + 2)),
                            (Some(Token::Ident(_)), Some(Token::Equals))
                        ) {
                            i += 1;
                            break;
                        }
                        i += 1;
                    } else {
                        break;
                    }
                }
                other => {
                    return Err(RewriteError::DtSyntax(format!(
                        "unexpected token {other:?} in value of {key}"
                    )))
                }
            }
        }
        apply_option(&mut options, key, &values)?;
    }
    Ok(options)
}

fn apply_option(
    options: &mut DtOptions,
    key: &str,
    values: &[&Token],
) -> Result<(), RewriteError> {
    let single_string = || -> Result<String, RewriteError> {
        match values {
            [Token::Str(s)] => Ok(s.clone()),
            _ => Err(RewriteError::DtSyntax(format!(
                "option {key} takes one quoted value"
            ))),
        }
    };
    match key {
        "timestamp" => match values {
            [Token::Var(name)] => {
                options.timestamp = Some(Variable::new_unchecked(name.clone()));
                Ok(())
            }
            _ => Err(RewriteError::DtSyntax(
                "timestamp takes one variable".to_owned(),
            )),
        },
        "timeseries" => {
            for value in values {
                match value {
                    Token::Var(name) => options
                        .timeseries
                        .push(Variable::new_unchecked(name.clone())),
                    _ => {
                        return Err(RewriteError::DtSyntax(
                            "timeseries takes variables".to_owned(),
                        ))
                    }
                }
            }
            Ok(())
        }
        "from" => {
            let value = single_string()?;
            if parse_date_time(&value).is_none() {
                return Err(RewriteError::DtSyntax(format!(
                    "'{value}' is not a dateTime"
                )));
            }
            options.from = Some(value);
            Ok(())
        }
        "to" => {
            let value = single_string()?;
            if parse_date_time(&value).is_none() {
                return Err(RewriteError::DtSyntax(format!(
                    "'{value}' is not a dateTime"
                )));
            }
            options.to = Some(value);
            Ok(())
        }
        "interval" => {
            options.interval_seconds = Some(parse_interval(&single_string()?)?);
            Ok(())
        }
        "aggregation" => {
            for value in values {
                match value {
                    Token::Str(name) => {
                        aggregate_function(name)?;
                        options.aggregations.push(name.clone());
                    }
                    _ => {
                        return Err(RewriteError::DtSyntax(
                            "aggregation takes quoted names".to_owned(),
                        ))
                    }
                }
            }
            Ok(())
        }
        other => Err(RewriteError::DtSyntax(format!("unknown option '{other}'"))),
    }
}

fn parse_interval(value: &str) -> Result<i64, RewriteError> {
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| RewriteError::DtSyntax(format!("'{value}' has no unit")))?;
    let (digits, unit) = value.split_at(split);
    let quantity: i64 = digits
        .parse()
        .map_err(|_| RewriteError::DtSyntax(format!("'{value}' is not a duration")))?;
    let seconds = match unit {
        "s" => quantity,
        "m" => quantity * 60,
        "h" => quantity * 3600,
        "d" => quantity * 86400,
        _ => {
            return Err(RewriteError::DtSyntax(format!(
                "unsupported interval unit '{unit}'"
            )))
        }
    };
    if seconds <= 0 {
        return Err(RewriteError::DtSyntax("interval must be positive".to_owned()));
    }
    Ok(seconds)
}

fn aggregate_function(name: &str) -> Result<AggregateFunction, RewriteError> {
    Ok(match name {
        "avg" => AggregateFunction::Avg,
        "min" => AggregateFunction::Min,
        "max" => AggregateFunction::Max,
        "sum" => AggregateFunction::Sum,
        "count" => AggregateFunction::Count,
        "first" => AggregateFunction::Custom(ct::AGG_FIRST.into_owned()),
        "last" => AggregateFunction::Custom(ct::AGG_LAST.into_owned()),
        other => {
            return Err(RewriteError::DtSyntax(format!(
                "unknown aggregation '{other}'"
            )))
        }
    })
}

fn inject(query: Query, options: &DtOptions) -> Result<Query, RewriteError> {
    let Query::Select {
        dataset,
        pattern,
        base_iri,
    } = query
    else {
        return Err(RewriteError::UnsupportedQueryType);
    };
    let pattern = inject_pattern(pattern, options)?;
    Ok(Query::Select {
        dataset,
        pattern,
        base_iri,
    })
}

/// Walks through the solution modifiers to the top-level projection and
/// splices the desugared algebra into it.
fn inject_pattern(
    pattern: GraphPattern,
    options: &DtOptions,
) -> Result<GraphPattern, RewriteError> {
    Ok(match pattern {
        GraphPattern::Slice {
            inner,
            start,
            length,
        } => GraphPattern::Slice {
            inner: Box::new(inject_pattern(*inner, options)?),
            start,
            length,
        },
        GraphPattern::Distinct { inner } => GraphPattern::Distinct {
            inner: Box::new(inject_pattern(*inner, options)?),
        },
        GraphPattern::Reduced { inner } => GraphPattern::Reduced {
            inner: Box::new(inject_pattern(*inner, options)?),
        },
        GraphPattern::Project { inner, variables } => {
            inject_project(*inner, variables, options)?
        }
        other => {
            return Err(RewriteError::DtSyntax(format!(
                "cannot desugar a DT block in this query shape: {other:?}"
            )))
        }
    })
}

fn inject_project(
    inner: GraphPattern,
    mut variables: Vec<Variable>,
    options: &DtOptions,
) -> Result<GraphPattern, RewriteError> {
    let series = if options.timeseries.is_empty() {
        detect_timeseries(&inner)?
    } else {
        options.timeseries.clone()
    };
    let timestamp = options
        .timestamp
        .clone()
        .unwrap_or_else(|| Variable::new_unchecked("dt_timestamp"));

    let mut triples = Vec::new();
    let mut value_variables = Vec::new();
    for s in &series {
        let data_point = Variable::new_unchecked(format!("{}_data_point", s.as_str()));
        let value = Variable::new_unchecked(format!("{}_value", s.as_str()));
        triples.push(triple(s, ct::HAS_DATA_POINT.into_owned(), &data_point));
        triples.push(triple(&data_point, ct::HAS_TIMESTAMP.into_owned(), &timestamp));
        triples.push(triple(&data_point, ct::HAS_VALUE.into_owned(), &value));
        value_variables.push((s.clone(), value));
    }

    let mut pattern = GraphPattern::Join {
        left: Box::new(inner),
        right: Box::new(GraphPattern::Bgp { patterns: triples }),
    };

    let mut clamps = Vec::new();
    if let Some(from) = &options.from {
        clamps.push(Expression::GreaterOrEqual(
            Box::new(Expression::Variable(timestamp.clone())),
            Box::new(Expression::Literal(Literal::new_typed_literal(
                from.clone(),
                xsd::DATE_TIME,
            ))),
        ));
    }
    if let Some(to) = &options.to {
        clamps.push(Expression::LessOrEqual(
            Box::new(Expression::Variable(timestamp.clone())),
            Box::new(Expression::Literal(Literal::new_typed_literal(
                to.clone(),
                xsd::DATE_TIME,
            ))),
        ));
    }
    for clamp in clamps {
        pattern = GraphPattern::Filter {
            expr: clamp,
            inner: Box::new(pattern),
        };
    }

    if options.aggregations.is_empty() {
        if options.interval_seconds.is_some() {
            return Err(RewriteError::DtSyntax(
                "interval requires at least one aggregation".to_owned(),
            ));
        }
        variables.push(timestamp);
        variables.extend(value_variables.into_iter().map(|(_, v)| v));
        return Ok(GraphPattern::Project {
            inner: Box::new(pattern),
            variables,
        });
    }

    let mut group_keys = variables.clone();
    if let Some(seconds) = options.interval_seconds {
        let bucket = Variable::new_unchecked(format!("{}_bucket", timestamp.as_str()));
        pattern = GraphPattern::Extend {
            inner: Box::new(pattern),
            variable: bucket.clone(),
            expression: Expression::FunctionCall(
                Function::Custom(NamedNode::from(
                    ct::FLOOR_DATE_TIME_TO_SECONDS_INTERVAL,
                )),
                vec![
                    Expression::Variable(timestamp.clone()),
                    Expression::Literal(Literal::from(seconds)),
                ],
            ),
        };
        group_keys.push(bucket.clone());
        variables.push(bucket);
    }

    let mut aggregates = Vec::new();
    for (series_variable, value_variable) in &value_variables {
        for aggregation in &options.aggregations {
            let output = Variable::new_unchecked(format!(
                "{}_value_{aggregation}",
                series_variable.as_str()
            ));
            aggregates.push((
                output.clone(),
                AggregateExpression::FunctionCall {
                    name: aggregate_function(aggregation)?,
                    expr: Expression::Variable(value_variable.clone()),
                    distinct: false,
                },
            ));
            variables.push(output);
        }
    }

    Ok(GraphPattern::Project {
        inner: Box::new(GraphPattern::Group {
            inner: Box::new(pattern),
            variables: group_keys,
            aggregates,
        }),
        variables,
    })
}

/// Finds the timeseries variables in scope: objects of `ct:hasTimeseries`
/// and subjects of `ct:hasDataPoint`.
fn detect_timeseries(pattern: &GraphPattern) -> Result<Vec<Variable>, RewriteError> {
    let mut found = Vec::new();
    collect_timeseries(pattern, &mut found);
    match found.len() {
        0 => Err(RewriteError::AmbiguousDTBinding(
            "no timeseries variable in scope".to_owned(),
        )),
        1 => Ok(found),
        _ => Err(RewriteError::AmbiguousDTBinding(format!(
            "several timeseries variables in scope: {}",
            found
                .iter()
                .map(Variable::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

fn collect_timeseries(pattern: &GraphPattern, out: &mut Vec<Variable>) {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for t in patterns {
                let NamedNodePattern::NamedNode(predicate) = &t.predicate else {
                    continue;
                };
                if predicate.as_ref() == ct::HAS_TIMESERIES {
                    if let TermPattern::Variable(v) = &t.object {
                        if !out.contains(v) {
                            out.push(v.clone());
                        }
                    }
                }
                if predicate.as_ref() == ct::HAS_DATA_POINT {
                    if let TermPattern::Variable(v) = &t.subject {
                        if !out.contains(v) {
                            out.push(v.clone());
                        }
                    }
                }
            }
        }
        GraphPattern::Join { left, right }
        | GraphPattern::LeftJoin { left, right, .. }
        | GraphPattern::Lateral { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::Minus { left, right } => {
            collect_timeseries(left, out);
            collect_timeseries(right, out);
        }
        GraphPattern::Filter { inner, .. }
        | GraphPattern::Graph { inner, .. }
        | GraphPattern::Extend { inner, .. }
        | GraphPattern::OrderBy { inner, .. }
        | GraphPattern::Project { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. }
        | GraphPattern::Group { inner, .. }
        | GraphPattern::Service { inner, .. } => collect_timeseries(inner, out),
        GraphPattern::Path { .. } | GraphPattern::Values { .. } => {}
    }
}

fn triple(subject: &Variable, predicate: NamedNode, object: &Variable) -> TriplePattern {
    TriplePattern {
        subject: TermPattern::Variable(subject.clone()),
        predicate: NamedNodePattern::NamedNode(predicate),
        object: TermPattern::Variable(object.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIXES: &str = "PREFIX ct: <https://github.com/DataTreehouse/chrontext#> \
         PREFIX types: <http://example.org/types#> ";

    #[test]
    fn queries_without_dt_parse_unchanged() {
        let query = parse_query("SELECT ?s WHERE { ?s ?p ?o }").unwrap();
        assert!(matches!(query, Query::Select { .. }));
    }

    #[test]
    fn dt_block_expands_to_data_point_triples_and_clamp() {
        let sparql = format!(
            "{PREFIXES} SELECT ?w WHERE {{ \
               ?w types:hasSensor ?s . ?s ct:hasTimeseries ?ts . \
               DT {{ timestamp = ?t, from = \"2022-06-01T08:46:53Z\" }} }}"
        );
        let query = parse_query(&sparql).unwrap();
        let Query::Select { pattern, .. } = query else {
            panic!("expected select");
        };
        let GraphPattern::Project { inner, variables } = pattern else {
            panic!("expected project");
        };
        // The timestamp and the series value column are now projected.
        assert!(variables.iter().any(|v| v.as_str() == "t"));
        assert!(variables.iter().any(|v| v.as_str() == "ts_value"));
        let GraphPattern::Filter { .. } = *inner else {
            panic!("expected the clamping filter, got {inner:?}");
        };
    }

    #[test]
    fn dt_aggregation_with_interval_groups_into_buckets() {
        let sparql = format!(
            "{PREFIXES} SELECT ?w WHERE {{ \
               ?w types:hasSensor ?s . ?s ct:hasTimeseries ?ts . \
               DT {{ from = \"2022-06-01T08:46:53Z\", \
                     aggregation = \"avg\", interval = \"5s\" }} }}"
        );
        let query = parse_query(&sparql).unwrap();
        let Query::Select { pattern, .. } = query else {
            panic!("expected select");
        };
        let GraphPattern::Project { inner, variables } = pattern else {
            panic!("expected project");
        };
        assert!(variables.iter().any(|v| v.as_str() == "ts_value_avg"));
        let GraphPattern::Group {
            variables: keys,
            aggregates,
            ..
        } = *inner
        else {
            panic!("expected group, got {inner:?}");
        };
        assert!(keys.iter().any(|v| v.as_str() == "dt_timestamp_bucket"));
        assert_eq!(aggregates.len(), 1);
    }

    #[test]
    fn multiple_timeseries_without_binding_is_ambiguous() {
        let sparql = format!(
            "{PREFIXES} SELECT ?w WHERE {{ \
               ?w ct:hasTimeseries ?ts1 . ?w ct:hasTimeseries ?ts2 . \
               DT {{ from = \"2022-06-01T08:46:53Z\" }} }}"
        );
        let err = parse_query(&sparql).unwrap_err();
        assert!(matches!(err, RewriteError::AmbiguousDTBinding(_)));
    }

    #[test]
    fn interval_units() {
        assert_eq!(parse_interval("5s").unwrap(), 5);
        assert_eq!(parse_interval("10m").unwrap(), 600);
        assert_eq!(parse_interval("1h").unwrap(), 3600);
        assert!(parse_interval("5x").is_err());
    }
}
