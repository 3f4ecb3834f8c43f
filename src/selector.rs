//! Structural query strings
//!
//! A small CSS selector subset, enough for the selectors element watchers are
//! handed in practice:
//!
//! - type selectors and `*`
//! - `#id`, `.class`
//! - attribute selectors: `[attr]`, `[attr=v]`, `[attr~=v]`, `[attr^=v]`,
//!   `[attr$=v]`, `[attr*=v]` (values bare or quoted)
//! - descendant (whitespace) and child (`>`) combinators
//! - selector lists (`a, b`)
//!
//! Matching works against any tree that implements [`SelectorTarget`], so the
//! sandbox document and other DOM-like trees share one matcher.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,

    #[error("unexpected '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected end of selector")]
    UnexpectedEnd,

    #[error("expected a simple selector at offset {offset}")]
    ExpectedCompound { offset: usize },
}

/// Element view the matcher needs from a tree
pub trait SelectorTarget: Sized {
    /// Lowercase tag name, `None` for non-element nodes
    fn local_name(&self) -> Option<&str>;

    fn attribute(&self, name: &str) -> Option<&str>;

    fn parent_element(&self) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    op: AttrOp,
    value: String,
}

impl AttrSelector {
    fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => actual == self.value,
            AttrOp::Includes => actual.split_whitespace().any(|w| w == self.value),
            AttrOp::Prefix => !self.value.is_empty() && actual.starts_with(&self.value),
            AttrOp::Suffix => !self.value.is_empty() && actual.ends_with(&self.value),
            AttrOp::Substring => !self.value.is_empty() && actual.contains(&self.value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    /// `None` means any element (`*` or omitted)
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
    }

    fn matches<T: SelectorTarget>(&self, el: &T) -> bool {
        let Some(name) = el.local_name() else {
            return false;
        };
        if let Some(tag) = &self.tag
            && !tag.eq_ignore_ascii_case(name)
        {
            return false;
        }
        if let Some(id) = &self.id
            && el.attribute("id") != Some(id.as_str())
        {
            return false;
        }
        if !self.classes.is_empty() {
            let class_attr = el.attribute("class").unwrap_or("");
            if !self
                .classes
                .iter()
                .all(|c| class_attr.split_whitespace().any(|have| have == c))
            {
                return false;
            }
        }
        self.attrs.iter().all(|a| a.matches(el.attribute(&a.name)))
    }
}

/// One comma-separated branch: compounds joined by combinators
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    compounds: Vec<Compound>,
    /// `combinators[i]` sits between `compounds[i]` and `compounds[i + 1]`
    combinators: Vec<Combinator>,
}

impl Complex {
    fn matches<T: SelectorTarget>(&self, el: &T) -> bool {
        self.matches_at(self.compounds.len() - 1, el)
    }

    fn matches_at<T: SelectorTarget>(&self, idx: usize, el: &T) -> bool {
        if !self.compounds[idx].matches(el) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => el
                .parent_element()
                .is_some_and(|parent| self.matches_at(idx - 1, &parent)),
            Combinator::Descendant => {
                let mut cursor = el.parent_element();
                while let Some(ancestor) = cursor {
                    if self.matches_at(idx - 1, &ancestor) {
                        return true;
                    }
                    cursor = ancestor.parent_element();
                }
                false
            }
        }
    }
}

/// Parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    branches: Vec<Complex>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }
        let branches = Parser::new(trimmed).parse_list()?;
        Ok(Self {
            source: trimmed.to_string(),
            branches,
        })
    }

    pub fn matches<T: SelectorTarget>(&self, el: &T) -> bool {
        self.branches.iter().any(|b| b.matches(el))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            len: input.len(),
        }
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map(|&(i, _)| i).unwrap_or(self.len)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while self.peek().is_some_and(char::is_whitespace) {
            self.chars.next();
            skipped = true;
        }
        skipped
    }

    fn parse_list(&mut self) -> Result<Vec<Complex>, SelectorError> {
        let mut branches = vec![self.parse_complex()?];
        while self.peek() == Some(',') {
            self.chars.next();
            self.skip_whitespace();
            branches.push(self.parse_complex()?);
        }
        if let Some((offset, found)) = self.chars.next() {
            return Err(SelectorError::UnexpectedChar { found, offset });
        }
        Ok(branches)
    }

    fn parse_complex(&mut self) -> Result<Complex, SelectorError> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();

        loop {
            let had_space = self.skip_whitespace();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.chars.next();
                    self.skip_whitespace();
                    Combinator::Child
                }
                Some(_) if had_space => Combinator::Descendant,
                Some(found) => {
                    let offset = self.offset();
                    return Err(SelectorError::UnexpectedChar { found, offset });
                }
            };
            combinators.push(combinator);
            compounds.push(self.parse_compound()?);
        }

        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let start = self.offset();
        let mut compound = Compound::default();

        match self.peek() {
            Some('*') => {
                self.chars.next();
                // `*` alone is a valid compound that matches every element
                return self.parse_qualifiers(compound, start, true);
            }
            Some(c) if is_ident_char(c) => {
                compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
            }
            _ => {}
        }

        self.parse_qualifiers(compound, start, false)
    }

    fn parse_qualifiers(
        &mut self,
        mut compound: Compound,
        start: usize,
        universal: bool,
    ) -> Result<Compound, SelectorError> {
        loop {
            match self.peek() {
                Some('#') => {
                    self.chars.next();
                    compound.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.chars.next();
                    compound.classes.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.chars.next();
                    compound.attrs.push(self.parse_attr()?);
                }
                _ => break,
            }
        }

        if compound.is_empty() && !universal {
            return Err(SelectorError::ExpectedCompound { offset: start });
        }
        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            ident.push(c);
            self.chars.next();
        }
        if ident.is_empty() {
            return Err(match self.chars.peek() {
                Some(&(offset, found)) => SelectorError::UnexpectedChar { found, offset },
                None => SelectorError::UnexpectedEnd,
            });
        }
        Ok(ident)
    }

    fn parse_attr(&mut self) -> Result<AttrSelector, SelectorError> {
        self.skip_whitespace();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_whitespace();

        let op = match self.chars.next() {
            Some((_, ']')) => {
                return Ok(AttrSelector {
                    name,
                    op: AttrOp::Exists,
                    value: String::new(),
                });
            }
            Some((_, '=')) => AttrOp::Equals,
            Some((offset, c @ ('~' | '^' | '$' | '*'))) => {
                match self.chars.next() {
                    Some((_, '=')) => {}
                    Some((offset, found)) => {
                        return Err(SelectorError::UnexpectedChar { found, offset });
                    }
                    None => return Err(SelectorError::UnexpectedEnd),
                }
                match c {
                    '~' => AttrOp::Includes,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    '*' => AttrOp::Substring,
                    found => return Err(SelectorError::UnexpectedChar { found, offset }),
                }
            }
            Some((offset, found)) => return Err(SelectorError::UnexpectedChar { found, offset }),
            None => return Err(SelectorError::UnexpectedEnd),
        };

        self.skip_whitespace();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.chars.next();
                let mut value = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, c)) if c == quote => break,
                        Some((_, c)) => value.push(c),
                        None => return Err(SelectorError::UnexpectedEnd),
                    }
                }
                value
            }
            _ => self.parse_ident()?,
        };

        self.skip_whitespace();
        match self.chars.next() {
            Some((_, ']')) => Ok(AttrSelector { name, op, value }),
            Some((offset, found)) => Err(SelectorError::UnexpectedChar { found, offset }),
            None => Err(SelectorError::UnexpectedEnd),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}
