//! Shell-style wildcard matching for whitelist patterns.
//!
//! `*` matches any run of characters (including none), `?` exactly one, and
//! `[...]` one character from a set. A set may be negated with a leading `!`
//! or `^` and may contain ranges such as `a-z`. A `]` directly after the
//! opening bracket (or the negation mark) is a literal member. An unclosed
//! `[` matches itself. Outside a class, `\` makes the next character literal;
//! inside one it is an ordinary member.

/// True if `pattern` contains any wildcard syntax.
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // position after the last `*` and the text index it is currently covering
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some('?') => Some(1),
            Some('\\') => match pattern.get(p + 1) {
                Some(escaped) => (*escaped == text[t]).then_some(2),
                None => (text[t] == '\\').then_some(1),
            },
            Some('[') => match match_class(&pattern[p..], text[t]) {
                Some((true, len)) => Some(len),
                Some((false, _)) => None,
                None if text[t] == '[' => Some(1),
                None => None,
            },
            Some(c) if *c == text[t] => Some(1),
            _ => None,
        };

        match step {
            Some(len) => {
                p += len;
                t += 1;
            }
            None => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Match `c` against the class starting at `class[0] == '['`. Returns whether
/// it matched and the class length in pattern chars, or `None` if the class
/// is never closed.
fn match_class(class: &[char], c: char) -> Option<(bool, usize)> {
    let mut i = 1;
    let negated = matches!(class.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let current = *class.get(i)?;
        if current == ']' && !first {
            break;
        }
        first = false;

        if class.get(i + 1) == Some(&'-') && class.get(i + 2).is_some_and(|end| *end != ']') {
            let end = class[i + 2];
            if current <= c && c <= end {
                matched = true;
            }
            i += 3;
        } else {
            if current == c {
                matched = true;
            }
            i += 1;
        }
    }

    Some((matched != negated, i + 1))
}
