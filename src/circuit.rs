use std::fmt;

use log::debug;

/// Represents an individual gate in a formula.
///
/// Operands reference earlier gates by their 0-based declaration position;
/// the parser guarantees every reference points at an already-declared gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    /// Read one bit of the evaluation input.
    ///
    /// The bit position is the gate's own declaration index: the text format
    /// carries no separate operand for it.
    Input { bit: usize },
    /// The conjunction of two earlier gates.
    And(usize, usize),
    /// The negation of an earlier gate.
    Not(usize),
    /// An alias for an earlier gate.
    Id(usize),
}

/// A parsed boolean formula.
///
/// Gates are stored in declaration order, which is guaranteed to be a
/// topological order of the formula DAG. Exactly one gate is the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Circuit {
    gates: Vec<Gate>,
    output: usize,
}

impl Circuit {
    /// The gates of this circuit, in declaration order.
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// The index of the output gate.
    pub fn output(&self) -> usize {
        self.output
    }
}

/// Errors produced when parsing a circuit file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The leading token of a line did not parse as an integer.
    BadGateIndex { line: usize },
    /// A declared gate index did not match its declaration position.
    IndexOutOfOrder {
        line: usize,
        index: usize,
        expected: usize,
    },
    /// A gate keyword other than ID, AND or NOT.
    UnsupportedGate { line: usize, keyword: String },
    /// The wrong number of operands for a gate kind.
    WrongArity {
        line: usize,
        keyword: &'static str,
        expected: usize,
        found: usize,
    },
    /// An operand that did not parse as an integer.
    BadOperand { line: usize },
    /// An operand referencing a gate that has not been declared yet.
    UnknownOperand { line: usize, operand: usize },
    /// A non-comment line matching no rule of the grammar.
    UnknownLine { line: usize },
    /// A second line flagged as output.
    MultipleOutputs { line: usize },
    /// No line flagged as output.
    NoOutput,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BadGateIndex { line } => {
                write!(f, "line {line}: gate index not a number")
            }
            ParseError::IndexOutOfOrder {
                line,
                index,
                expected,
            } => write!(
                f,
                "line {line}: gate index {index} out of order, expected {expected}"
            ),
            ParseError::UnsupportedGate { line, keyword } => {
                write!(f, "line {line}: unsupported gate '{keyword}'")
            }
            ParseError::WrongArity {
                line,
                keyword,
                expected,
                found,
            } => write!(
                f,
                "line {line}: {keyword} gate takes {expected} operand(s), found {found}"
            ),
            ParseError::BadOperand { line } => {
                write!(f, "line {line}: gate operand not a number")
            }
            ParseError::UnknownOperand { line, operand } => {
                write!(f, "line {line}: unknown gate index {operand}")
            }
            ParseError::UnknownLine { line } => write!(f, "line {line}: unknown line type"),
            ParseError::MultipleOutputs { line } => {
                write!(f, "line {line}: only support single output gate")
            }
            ParseError::NoOutput => write!(f, "no output gate found"),
        }
    }
}

impl std::error::Error for ParseError {}

impl Circuit {
    /// Parse a circuit from its textual format.
    ///
    /// Lines starting with `#` or `:` are comments; blank lines are skipped.
    /// Every other line declares a gate:
    ///
    /// ```text
    /// <index> input
    /// <index> gate <TYPE> <operand...>
    /// <index> output gate <TYPE> <operand...>
    /// ```
    ///
    /// `<index>` must equal the line's 0-based declaration position, operands
    /// reference already-declared gates, and `<TYPE>` is one of ID, AND or
    /// NOT (case-insensitive). Exactly one line must be flagged `output`.
    pub fn parse(src: &str) -> Result<Self, ParseError> {
        let mut gates: Vec<Gate> = Vec::new();
        let mut output = None;
        for (i, raw) in src.lines().enumerate() {
            let line = i + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(':') {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            let index: usize = tokens[0]
                .parse()
                .map_err(|_| ParseError::BadGateIndex { line })?;
            if index != gates.len() {
                return Err(ParseError::IndexOutOfOrder {
                    line,
                    index,
                    expected: gates.len(),
                });
            }
            let keyword_at = match tokens.get(1) {
                Some(&"input") => {
                    gates.push(Gate::Input { bit: index });
                    continue;
                }
                Some(&"gate") => 2,
                Some(&"output") if tokens.get(2) == Some(&"gate") => 3,
                _ => return Err(ParseError::UnknownLine { line }),
            };
            let is_output = keyword_at == 3;
            let keyword = match tokens.get(keyword_at) {
                Some(keyword) => *keyword,
                None => return Err(ParseError::UnknownLine { line }),
            };
            let operands = parse_operands(&tokens[keyword_at + 1..], line)?;
            for &operand in &operands {
                if operand >= gates.len() {
                    return Err(ParseError::UnknownOperand { line, operand });
                }
            }
            let gate = match keyword.to_ascii_uppercase().as_str() {
                "AND" => {
                    check_arity("AND", 2, &operands, line)?;
                    Gate::And(operands[0], operands[1])
                }
                "NOT" => {
                    check_arity("NOT", 1, &operands, line)?;
                    Gate::Not(operands[0])
                }
                "ID" => {
                    check_arity("ID", 1, &operands, line)?;
                    Gate::Id(operands[0])
                }
                _ => {
                    return Err(ParseError::UnsupportedGate {
                        line,
                        keyword: keyword.to_string(),
                    })
                }
            };
            if is_output {
                if output.is_some() {
                    return Err(ParseError::MultipleOutputs { line });
                }
                output = Some(index);
            }
            gates.push(gate);
        }
        let output = output.ok_or(ParseError::NoOutput)?;
        debug!("parsed circuit: {} gates, output {}", gates.len(), output);
        Ok(Circuit { gates, output })
    }
}

fn parse_operands(tokens: &[&str], line: usize) -> Result<Vec<usize>, ParseError> {
    tokens
        .iter()
        .map(|token| token.parse().map_err(|_| ParseError::BadOperand { line }))
        .collect()
}

fn check_arity(
    keyword: &'static str,
    expected: usize,
    operands: &[usize],
    line: usize,
) -> Result<(), ParseError> {
    if operands.len() != expected {
        return Err(ParseError::WrongArity {
            line,
            keyword,
            expected,
            found: operands.len(),
        });
    }
    Ok(())
}

/// A test annotation extracted from a circuit file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    /// The evaluation input string.
    pub input: String,
    /// The expected evaluation result.
    pub expected: bool,
}

/// Extract the test annotations from circuit text.
///
/// A test case is a comment line of the form `# TEST <input> <expected>`,
/// where `<expected>` is an integer. Comment lines not of that exact shape
/// are ignored, as is everything else.
pub fn test_cases(src: &str) -> Vec<TestCase> {
    src.lines()
        .filter_map(|raw| {
            let line = raw.trim();
            if !line.starts_with('#') {
                return None;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                [_, "TEST", input, expected] => {
                    expected.parse::<i64>().ok().map(|value| TestCase {
                        input: (*input).to_string(),
                        expected: value != 0,
                    })
                }
                _ => None,
            }
        })
        .collect()
}
