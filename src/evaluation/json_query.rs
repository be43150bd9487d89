//! JSONPath query plus comparison against an expected value.
use serde_json::Value;
use serde_json_path::JsonPath;

use super::EvaluationError;

#[derive(Debug, Clone, PartialEq)]
pub struct JsonQueryOutcome {
    pub passed: bool,
    /// The queried value rendered as text, used in result messages.
    pub response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl QueryOperator {
    pub fn parse(raw: &str) -> Result<Self, EvaluationError> {
        match raw.trim() {
            "" | "==" => Ok(QueryOperator::Eq),
            "!=" => Ok(QueryOperator::NotEq),
            "<" => Ok(QueryOperator::Lt),
            "<=" => Ok(QueryOperator::Le),
            ">" => Ok(QueryOperator::Gt),
            ">=" => Ok(QueryOperator::Ge),
            "contains" => Ok(QueryOperator::Contains),
            other => Err(EvaluationError::UnsupportedOperator(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperator::Eq => "==",
            QueryOperator::NotEq => "!=",
            QueryOperator::Lt => "<",
            QueryOperator::Le => "<=",
            QueryOperator::Gt => ">",
            QueryOperator::Ge => ">=",
            QueryOperator::Contains => "contains",
        }
    }
}

/// Runs `expression` over `data` and returns the selected value.
///
/// Bare paths (`status`, `data.items[0]`) are rooted at `$`. An empty expression
/// selects the whole document. Several matches come back as an array and no match
/// as `null`. String input that holds JSON is parsed first.
pub fn query_value(data: &Value, expression: &str) -> Result<Value, EvaluationError> {
    let parsed;
    let document = match data {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                parsed = value;
                &parsed
            }
            Err(_) => data,
        },
        _ => data,
    };

    let expression = expression.trim();
    if expression.is_empty() || expression == "$" {
        return Ok(document.clone());
    }

    let normalized = if expression.starts_with('$') {
        expression.to_string()
    } else if expression.starts_with('[') {
        format!("${expression}")
    } else {
        format!("$.{expression}")
    };

    let path = JsonPath::parse(&normalized)
        .map_err(|e| EvaluationError::InvalidExpression(format!("{expression}: {e}")))?;
    let nodes = path.query(document).all();
    Ok(match nodes.len() {
        0 => Value::Null,
        1 => nodes[0].clone(),
        _ => Value::Array(nodes.into_iter().cloned().collect()),
    })
}

/// Strings render without quotes; everything else uses its JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn evaluate(
    data: &Value,
    expression: &str,
    operator: &str,
    expected: &str,
) -> Result<JsonQueryOutcome, EvaluationError> {
    let operator = QueryOperator::parse(operator)?;
    let selected = query_value(data, expression)?;
    let response = render_value(&selected);
    let passed = compare(&response, operator, expected)?;
    Ok(JsonQueryOutcome { passed, response })
}

pub fn compare(actual: &str, operator: QueryOperator, expected: &str) -> Result<bool, EvaluationError> {
    let numeric = |a: &str, e: &str| -> Result<(f64, f64), EvaluationError> {
        let a_num = a
            .trim()
            .parse::<f64>()
            .map_err(|_| EvaluationError::NonNumeric(a.to_string()))?;
        let e_num = e
            .trim()
            .parse::<f64>()
            .map_err(|_| EvaluationError::NonNumeric(e.to_string()))?;
        Ok((a_num, e_num))
    };

    Ok(match operator {
        QueryOperator::Eq => actual == expected,
        QueryOperator::NotEq => actual != expected,
        QueryOperator::Contains => actual.contains(expected),
        QueryOperator::Lt => {
            let (a, e) = numeric(actual, expected)?;
            a < e
        }
        QueryOperator::Le => {
            let (a, e) = numeric(actual, expected)?;
            a <= e
        }
        QueryOperator::Gt => {
            let (a, e) = numeric(actual, expected)?;
            a > e
        }
        QueryOperator::Ge => {
            let (a, e) = numeric(actual, expected)?;
            a >= e
        }
    })
}
