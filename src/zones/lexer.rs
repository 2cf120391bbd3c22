use crate::from_str::Field;
use pest::iterators::Pair;
use pest::Parser;

#[derive(Parser)]
#[grammar = "zones/zones.pest"]
struct ZoneLexer;

/// One logical line of a zone file. Parentheses have been removed, and any
/// newlines inside them joined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Line {
    /// The line number the logical line started on.
    pub number: usize,

    /// True if the line started with whitespace, so has no owner name.
    pub blank: bool,

    pub fields: Vec<Field>,
}

/// A lexing failure, with the line it happened on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LexError {
    pub line: usize,
    pub reason: String,
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

/// Describes what stopped the grammar at byte `pos`.
fn refusal(input: &str, pos: usize) -> String {
    let before = input.get(..pos).unwrap_or_default();
    let line = &before[before.rfind('\n').map_or(0, |i| i + 1)..];
    let rest = input.get(pos..).unwrap_or_default();

    if rest.starts_with('"') || open_quote(line) {
        return "missing closing '\"'".to_string();
    }

    match rest.chars().next() {
        Some('\r') => "carriage return without a newline".to_string(),
        Some(c) => format!("unexpected {:?}", c),
        None => "unexpected end of input".to_string(),
    }
}

/// True if `line` leaves a double quote open.
fn open_quote(line: &str) -> bool {
    let mut open = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => open = !open,
            ';' if !open => break,
            _ => (),
        }
    }
    open
}

/// Splits the input into logical lines.
pub(crate) fn lex(input: &str) -> Result<Vec<Line>, LexError> {
    let file = match ZoneLexer::parse(Rule::file, input) {
        Ok(mut pairs) => match pairs.next() {
            Some(file) => file,
            None => return Ok(Vec::new()),
        },
        Err(e) => {
            let line = match e.line_col {
                pest::error::LineColLocation::Pos((line, _)) => line,
                pest::error::LineColLocation::Span((line, _), _) => line,
            };
            let pos = match e.location {
                pest::error::InputLocation::Pos(pos) => pos,
                pest::error::InputLocation::Span((pos, _)) => pos,
            };

            return Err(LexError {
                line,
                reason: refusal(input, pos),
            });
        }
    };

    let mut lines = Vec::new();
    let mut current: Option<Line> = None;

    // Depth of parentheses, and the line the outermost was opened on.
    let mut depth = 0;
    let mut opened_at = 0;

    // Start of a physical line, outside of any parentheses.
    let mut at_start = true;
    let mut blank = false;

    for pair in file.into_inner() {
        match pair.as_rule() {
            Rule::blank => {
                if at_start {
                    blank = true;
                }
            }
            Rule::newline => {
                if depth == 0 {
                    lines.extend(current.take());
                    at_start = true;
                    blank = false;
                }
            }
            Rule::comment | Rule::EOI => (),
            Rule::open => {
                if depth == 0 {
                    opened_at = line_of(&pair);
                }
                depth += 1;
                at_start = false;
            }
            Rule::close => {
                if depth == 0 {
                    return Err(LexError {
                        line: line_of(&pair),
                        reason: "unexpected ')'".to_string(),
                    });
                }
                depth -= 1;
            }
            Rule::quoted | Rule::word => {
                let number = line_of(&pair);
                let field = match pair.as_rule() {
                    Rule::quoted => Field {
                        text: pair
                            .into_inner()
                            .next()
                            .map_or(String::new(), |inner| inner.as_str().to_string()),
                        quoted: true,
                    },
                    _ => Field {
                        text: pair.as_str().to_string(),
                        quoted: false,
                    },
                };

                current
                    .get_or_insert_with(|| Line {
                        number,
                        blank,
                        fields: Vec::new(),
                    })
                    .fields
                    .push(field);
                at_start = false;
            }
            rule => unreachable!("unexpected rule: {:?}", rule),
        }
    }

    if depth > 0 {
        return Err(LexError {
            line: opened_at,
            reason: "missing closing ')'".to_string(),
        });
    }

    lines.extend(current);
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(line: &Line) -> Vec<&str> {
        line.fields.iter().map(|f| f.text.as_str()).collect()
    }

    #[test]
    fn test_lines() {
        let input = "$ORIGIN example.com.\n\
                     @ IN SOA ns1 admin ( 1 ; serial\n\
                     \t2 3\n\
                     \t4 5 )\n\
                     \n\
                     ; a comment\n\
                     \tNS ns1 ; trailing\n\
                     www A 192.0.2.1\n";

        let lines = lex(input).unwrap();
        assert_eq!(lines.len(), 4);

        assert_eq!(words(&lines[0]), vec!["$ORIGIN", "example.com."]);
        assert_eq!(lines[0].number, 1);

        assert_eq!(
            words(&lines[1]),
            vec!["@", "IN", "SOA", "ns1", "admin", "1", "2", "3", "4", "5"]
        );
        assert_eq!(lines[1].number, 2);
        assert!(!lines[1].blank);

        assert_eq!(words(&lines[2]), vec!["NS", "ns1"]);
        assert_eq!(lines[2].number, 7);
        assert!(lines[2].blank);

        assert_eq!(words(&lines[3]), vec!["www", "A", "192.0.2.1"]);
    }

    #[test]
    fn test_quotes() {
        let lines = lex("txt TXT \"a ; b\" \"c \\\" d\"\nsvc HTTPS 1 . alpn=\"h2,h3\"").unwrap();

        assert_eq!(
            lines[0].fields[2..],
            [
                Field {
                    text: "a ; b".to_string(),
                    quoted: true
                },
                Field {
                    text: "c \\\" d".to_string(),
                    quoted: true
                },
            ]
        );
        assert_eq!(
            lines[1].fields[4],
            Field {
                text: "alpn=\"h2,h3\"".to_string(),
                quoted: false
            }
        );
    }

    #[test]
    fn test_parens_in_comment() {
        let lines = lex("a A 192.0.2.1 ; ( not open\nb A 192.0.2.2").unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            lex("a TXT \"unterminated\nb A 192.0.2.1"),
            Err(LexError {
                line: 1,
                reason: "missing closing '\"'".to_string()
            })
        );

        assert_eq!(
            lex("ok A 192.0.2.1\na SOA ( 1 2\n 3").unwrap_err().line,
            2
        );

        assert_eq!(lex("a A 192.0.2.1 )").unwrap_err().reason, "unexpected ')'");

        assert_eq!(
            lex("a A 192.0.2.1\nb A 192.0.2.2\rc A 192.0.2.3\n"),
            Err(LexError {
                line: 2,
                reason: "carriage return without a newline".to_string()
            })
        );

        assert_eq!(
            lex("svc HTTPS 1 . alpn=\"h2,h3\n").unwrap_err().reason,
            "missing closing '\"'"
        );
    }

    #[test]
    fn test_refusal() {
        assert_eq!(refusal("a TXT \"x", 6), "missing closing '\"'");
        assert_eq!(refusal("a TXT \"x\n", 8), "missing closing '\"'");
        assert_eq!(refusal("a \"b\" \\\"\r", 8), "carriage return without a newline");
        assert_eq!(refusal("a\r", 1), "carriage return without a newline");
        assert_eq!(refusal("a", 1), "unexpected end of input");
        assert_eq!(refusal("a\u{0}", 1), "unexpected '\\0'");
    }
}
