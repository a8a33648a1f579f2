//! `syntax-rules` macro engine.
//!
//! A macro is a set of literal identifiers and an ordered list of
//! `(pattern template)` rules. Patterns compile to matcher trees, templates
//! to template trees; transformation matches rules in order and expands the
//! first template whose pattern accepts the input form.
//!
//! This engine is deliberately un-hygienic: free identifiers in templates
//! expand verbatim into the use site.

use std::collections::{HashMap, HashSet};

use smol_str::SmolStr;

use crate::error::{Error, Result};
use crate::value::Value;

const ELLIPSIS: &str = "...";
const UNDERSCORE: &str = "_";

pub struct Macro {
    rules: Vec<SyntaxRule>,
}

impl Macro {
    /// Construct from the tail of a `(syntax-rules literals rules...)`
    /// form, i.e. everything after the `syntax-rules` keyword.
    pub(crate) fn new(body: &Value) -> Result<Macro> {
        let (literals_form, rules_form) = body
            .uncons()
            .ok_or_else(|| Error::Syntax(format!("invalid syntax-rules form: {}", body.repr())))?;

        let mut literals = HashSet::new();
        let mut cursor = literals_form;
        while let Some((head, tail)) = cursor.uncons() {
            match head {
                Value::Sym(name) => {
                    literals.insert(name);
                }
                other => {
                    return Err(Error::Syntax(format!(
                        "syntax-rules literal must be a symbol, but got {}",
                        other.repr()
                    )))
                }
            }
            cursor = tail;
        }
        if !cursor.is_nil() {
            return Err(Error::Syntax(format!(
                "invalid literals list in syntax-rules: {}",
                cursor.repr()
            )));
        }

        let mut rules = Vec::new();
        let mut cursor = rules_form;
        while let Some((rule, tail)) = cursor.uncons() {
            rules.push(SyntaxRule::new(&rule, &literals)?);
            cursor = tail;
        }
        if !cursor.is_nil() {
            return Err(Error::Syntax(format!(
                "invalid rule list in syntax-rules: {}",
                cursor.repr()
            )));
        }

        Ok(Macro { rules })
    }

    /// Expand one macro use. Rules are tried in order; the first whose
    /// pattern matches wins. Template expansion errors propagate, only
    /// match failure falls through to the next rule.
    pub fn transform(&self, form: &Value) -> Result<Value> {
        let (_keyword, args) = form
            .uncons()
            .ok_or_else(|| Error::Syntax(format!("invalid macro use: {}", form.repr())))?;

        for rule in &self.rules {
            let mut dict = MatchDict::new();
            // The top-level matcher consumes a one-element list holding
            // the argument list, mirroring how sub-sequences are matched.
            let wrapped = Value::cons(args.clone(), Value::Nil);
            if rule.matcher.match_expr(&wrapped, &mut dict).is_ok() {
                let mut index = Vec::new();
                let expanded = rule.template.expand(&dict, &mut index)?;
                return Ok(expanded.into_iter().next().unwrap_or(Value::Nil));
            }
        }

        Err(Error::Syntax(format!(
            "no syntax rule matches {}",
            form.repr()
        )))
    }
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Macro").field("rules", &self.rules.len()).finish()
    }
}

struct SyntaxRule {
    matcher: Matcher,
    template: Template,
}

impl SyntaxRule {
    fn new(rule: &Value, literals: &HashSet<SmolStr>) -> Result<SyntaxRule> {
        let (pattern, rest) = rule.uncons().ok_or_else(|| {
            Error::Syntax(format!(
                "expecting (pattern template) for syntax rule, but got {}",
                rule.repr()
            ))
        })?;
        let (template, extra) = rest.uncons().ok_or_else(|| {
            Error::Syntax(format!(
                "expecting (pattern template) for syntax rule, but got {}",
                rule.repr()
            ))
        })?;
        if !extra.is_nil() {
            return Err(Error::Syntax(format!(
                "extra expressions in syntax rule: {}",
                rule.repr()
            )));
        }

        // The first pattern element stands for the macro keyword itself
        // and is skipped.
        let (_keyword, pattern_tail) = pattern.uncons().ok_or_else(|| {
            Error::Syntax(format!("invalid pattern for macro: {}", pattern.repr()))
        })?;

        let mut variables = HashSet::new();
        let matcher = compile_pattern(&pattern_tail, literals, &mut variables)?;
        let template = compile_template(&template, &variables)?;

        Ok(SyntaxRule { matcher, template })
    }
}

// ----------------------------------------------------------------------------
// Pattern matching

/// Internal signal that a matcher rejected its input. Ends ellipsis
/// repetition and rule selection; never surfaces to users.
struct MatchError;

type MatchResult<T> = std::result::Result<T, MatchError>;

/// Matched values keyed by pattern variable name.
type MatchDict = HashMap<SmolStr, Binding>;

/// A pattern variable binds a single expression, or an ordered collection
/// per ellipsis nesting level.
#[derive(Debug, Clone)]
enum Binding {
    Single(Value),
    Many(Vec<Binding>),
}

struct Matcher {
    kind: MatcherKind,
    /// Zero-or-more repetition: the pattern was followed by `...`.
    ellipsis: bool,
}

enum MatcherKind {
    /// A literal identifier: input must be the same symbol.
    Literal(SmolStr),
    /// Matches any one element and discards it.
    Underscore,
    /// Matches any one element and binds it.
    Variable(SmolStr),
    /// Any other datum: input must be structurally equal.
    Constant(Value),
    /// A sub-list of matchers applied in order.
    Sequence(Vec<Matcher>),
    /// Matches the improper tail of the surrounding list.
    Rest(Box<Matcher>),
}

impl Matcher {
    fn plain(kind: MatcherKind) -> Matcher {
        Matcher {
            kind,
            ellipsis: false,
        }
    }

    /// Match against the head of `expr` and return the remaining list.
    fn match_expr(&self, expr: &Value, dict: &mut MatchDict) -> MatchResult<Value> {
        match &self.kind {
            MatcherKind::Literal(name) => {
                let (head, tail) = expr.uncons().ok_or(MatchError)?;
                match head {
                    Value::Sym(sym) if &sym == name => Ok(tail),
                    _ => Err(MatchError),
                }
            }
            MatcherKind::Underscore => {
                if self.ellipsis {
                    let mut cursor = expr.clone();
                    while let Some((_, tail)) = cursor.uncons() {
                        cursor = tail;
                    }
                    if cursor.is_nil() {
                        Ok(Value::Nil)
                    } else {
                        // Improper list under ellipsis.
                        Err(MatchError)
                    }
                } else {
                    let (_, tail) = expr.uncons().ok_or(MatchError)?;
                    Ok(tail)
                }
            }
            MatcherKind::Variable(name) => {
                if self.ellipsis {
                    let mut collected = Vec::new();
                    let mut cursor = expr.clone();
                    while let Some((head, tail)) = cursor.uncons() {
                        collected.push(Binding::Single(head));
                        cursor = tail;
                    }
                    if !cursor.is_nil() {
                        return Err(MatchError);
                    }
                    dict.insert(name.clone(), Binding::Many(collected));
                    Ok(Value::Nil)
                } else {
                    let (head, tail) = expr.uncons().ok_or(MatchError)?;
                    dict.insert(name.clone(), Binding::Single(head));
                    Ok(tail)
                }
            }
            MatcherKind::Constant(value) => {
                let (head, tail) = expr.uncons().ok_or(MatchError)?;
                if &head == value {
                    Ok(tail)
                } else {
                    Err(MatchError)
                }
            }
            MatcherKind::Rest(inner) => {
                inner.match_expr(&Value::cons(expr.clone(), Value::Nil), dict)
            }
            MatcherKind::Sequence(items) => {
                if self.ellipsis {
                    // Greedy repetition: the first failing element ends it.
                    // Bindings collect into per-variable collections; a
                    // partially matched element contributes nothing.
                    let mut collected: HashMap<SmolStr, Vec<Binding>> = HashMap::new();
                    let mut cursor = expr.clone();
                    while let Some((head, tail)) = cursor.uncons() {
                        let mut scratch = MatchDict::new();
                        if match_items(items, &head, &mut scratch).is_err() {
                            break;
                        }
                        for (name, binding) in scratch {
                            collected.entry(name).or_default().push(binding);
                        }
                        cursor = tail;
                    }
                    for (name, bindings) in collected {
                        dict.insert(name, Binding::Many(bindings));
                    }
                    Ok(cursor)
                } else {
                    let (head, tail) = expr.uncons().ok_or(MatchError)?;
                    match_items(items, &head, dict)?;
                    Ok(tail)
                }
            }
        }
    }
}

/// Run a matcher sequence over a complete list; every element must be
/// consumed.
fn match_items(items: &[Matcher], list: &Value, dict: &mut MatchDict) -> MatchResult<()> {
    let mut remaining = list.clone();
    for matcher in items {
        remaining = matcher.match_expr(&remaining, dict)?;
    }
    if remaining.is_nil() {
        Ok(())
    } else {
        Err(MatchError)
    }
}

fn compile_pattern(
    pattern: &Value,
    literals: &HashSet<SmolStr>,
    variables: &mut HashSet<SmolStr>,
) -> Result<Matcher> {
    if matches!(pattern, Value::Pair(_)) {
        let mut items = Vec::new();
        let mut cursor = pattern.clone();

        while let Some((head, tail)) = cursor.uncons() {
            let mut matcher = compile_pattern(&head, literals, variables)?;
            cursor = tail;

            if let Some((next, next_tail)) = cursor.uncons() {
                if matches!(&next, Value::Sym(sym) if sym == ELLIPSIS) {
                    matcher.ellipsis = true;
                    cursor = next_tail;
                }
            }

            items.push(matcher);
        }

        if !cursor.is_nil() {
            let tail_matcher = compile_pattern(&cursor, literals, variables)?;
            items.push(Matcher::plain(MatcherKind::Rest(Box::new(tail_matcher))));
        }

        return Ok(Matcher::plain(MatcherKind::Sequence(items)));
    }

    match pattern {
        Value::Sym(name) if literals.contains(name) => {
            Ok(Matcher::plain(MatcherKind::Literal(name.clone())))
        }
        Value::Sym(name) if name == UNDERSCORE => Ok(Matcher::plain(MatcherKind::Underscore)),
        Value::Sym(name) => {
            if !variables.insert(name.clone()) {
                return Err(Error::Syntax(format!(
                    "duplicated variable in macro: {name}"
                )));
            }
            Ok(Matcher::plain(MatcherKind::Variable(name.clone())))
        }
        other => Ok(Matcher::plain(MatcherKind::Constant(other.clone()))),
    }
}

// ----------------------------------------------------------------------------
// Template expansion

struct Template {
    kind: TemplateKind,
    /// How many ellipsis nesting levels to unfold: the number of `...`
    /// tokens directly following this node in the source template.
    nflatten: usize,
}

enum TemplateKind {
    Constant(Value),
    /// Reference to a pattern variable.
    Variable(SmolStr),
    Sequence {
        items: Vec<Template>,
        tail: Box<Template>,
        /// Every variable referenced anywhere inside; the ones bound to
        /// collections determine the common repetition count when the
        /// sequence itself repeats.
        ellipsis_names: Vec<SmolStr>,
    },
}

impl Template {
    fn constant(value: Value) -> Template {
        Template {
            kind: TemplateKind::Constant(value),
            nflatten: 0,
        }
    }

    /// Expand into the list elements this node contributes.
    fn expand(&self, dict: &MatchDict, index: &mut Vec<usize>) -> Result<Vec<Value>> {
        match &self.kind {
            TemplateKind::Constant(value) => Ok(vec![value.clone()]),
            TemplateKind::Variable(name) => self.expand_variable(name, dict, index),
            TemplateKind::Sequence {
                items,
                tail,
                ellipsis_names,
            } => self.expand_sequence(items, tail, ellipsis_names, dict, index, self.nflatten),
        }
    }

    fn expand_variable(
        &self,
        name: &SmolStr,
        dict: &MatchDict,
        index: &[usize],
    ) -> Result<Vec<Value>> {
        let binding = drill(name, dict, index)?;

        // Unfold one collection level per trailing ellipsis.
        let mut layer = vec![binding];
        for _ in 0..self.nflatten {
            let mut next = Vec::new();
            for binding in layer {
                match binding {
                    Binding::Many(items) => next.extend(items),
                    Binding::Single(_) => {
                        return Err(Error::Syntax(format!(
                            "too many ellipsis for variable {name}"
                        )))
                    }
                }
            }
            layer = next;
        }

        layer
            .into_iter()
            .map(|binding| match binding {
                Binding::Single(value) => Ok(value),
                Binding::Many(_) => Err(Error::Syntax(format!(
                    "missing ellipsis after variable {name}"
                ))),
            })
            .collect()
    }

    fn expand_sequence(
        &self,
        items: &[Template],
        tail: &Template,
        ellipsis_names: &[SmolStr],
        dict: &MatchDict,
        index: &mut Vec<usize>,
        flatten: usize,
    ) -> Result<Vec<Value>> {
        if flatten == 0 {
            let mut elements = Vec::new();
            for item in items {
                elements.extend(item.expand(dict, index)?);
            }
            let mut rest = tail
                .expand(dict, index)?
                .into_iter()
                .next()
                .unwrap_or(Value::Nil);
            for element in elements.into_iter().rev() {
                rest = Value::cons(element, rest);
            }
            return Ok(vec![rest]);
        }

        // All collection-bound variables in the sequence must agree on
        // the repetition count at this nesting level. Variables bound to
        // single values repeat unchanged and carry no count.
        let mut length = None;
        for name in ellipsis_names {
            let items = match drill(name, dict, index)? {
                Binding::Many(items) => items,
                Binding::Single(_) => continue,
            };
            match length {
                None => length = Some(items.len()),
                Some(count) if count == items.len() => {}
                Some(_) => {
                    return Err(Error::Syntax(format!(
                        "incompatible ellipsis match counts for variable {name}"
                    )))
                }
            }
        }

        // Zero repetitions expand to the empty list.
        let mut result = Vec::new();
        for i in 0..length.unwrap_or(0) {
            index.push(i);
            let expanded = self.expand_sequence(items, tail, ellipsis_names, dict, index, flatten - 1);
            index.pop();
            result.extend(expanded?);
        }
        Ok(result)
    }
}

/// Look up a variable and select the collection element at each open
/// repetition level. Variables bound outside the repetition pass through
/// unchanged.
fn drill(name: &SmolStr, dict: &MatchDict, index: &[usize]) -> Result<Binding> {
    let mut binding = dict
        .get(name)
        .cloned()
        .unwrap_or(Binding::Many(Vec::new()));

    for &i in index {
        let selected = match &binding {
            Binding::Many(items) => match items.get(i) {
                Some(item) => item.clone(),
                None => {
                    return Err(Error::Syntax(format!(
                        "incompatible ellipsis match counts for variable {name}"
                    )))
                }
            },
            Binding::Single(_) => break,
        };
        binding = selected;
    }

    Ok(binding)
}

fn compile_template(template: &Value, variables: &HashSet<SmolStr>) -> Result<Template> {
    if matches!(template, Value::Pair(_)) {
        let mut items = Vec::new();
        let mut cursor = template.clone();

        while let Some((head, tail)) = cursor.uncons() {
            let mut item = compile_template(&head, variables)?;
            cursor = tail;

            let mut nflatten = 0;
            while let Some((next, next_tail)) = cursor.uncons() {
                if matches!(&next, Value::Sym(sym) if sym == ELLIPSIS) {
                    nflatten += 1;
                    cursor = next_tail;
                } else {
                    break;
                }
            }
            item.nflatten = nflatten;
            items.push(item);
        }

        let tail = if cursor.is_nil() {
            Template::constant(Value::Nil)
        } else {
            compile_template(&cursor, variables)?
        };

        let mut ellipsis_names = Vec::new();
        for item in items.iter().chain(std::iter::once(&tail)) {
            collect_ellipsis_names(item, &mut ellipsis_names);
        }

        return Ok(Template {
            kind: TemplateKind::Sequence {
                items,
                tail: Box::new(tail),
                ellipsis_names,
            },
            nflatten: 0,
        });
    }

    match template {
        Value::Sym(name) if variables.contains(name) => Ok(Template {
            kind: TemplateKind::Variable(name.clone()),
            nflatten: 0,
        }),
        other => Ok(Template::constant(other.clone())),
    }
}

fn collect_ellipsis_names(template: &Template, out: &mut Vec<SmolStr>) {
    match &template.kind {
        TemplateKind::Variable(name) => out.push(name.clone()),
        TemplateKind::Sequence { ellipsis_names, .. } => {
            out.extend(ellipsis_names.iter().cloned())
        }
        TemplateKind::Constant(_) => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::parse;

    fn make_macro(source: &str) -> Macro {
        // Source is a full (syntax-rules ...) form; the engine consumes
        // everything after the keyword.
        let form = parse(source).expect("parse")[0].clone();
        let (_, tail) = form.uncons().expect("syntax-rules form");
        Macro::new(&tail).expect("macro construction")
    }

    fn transform(macro_: &Macro, source: &str) -> Value {
        let form = parse(source).expect("parse")[0].clone();
        macro_.transform(&form).expect("transform")
    }

    #[test]
    fn test_when_expansion() {
        let when = make_macro("(syntax-rules () ((_ c e ...) (if c (begin e ...) '())))");
        let expanded = transform(&when, "(when #t 1 2 3)");
        assert_eq!(expanded.repr().to_string(), "(if #t (begin 1 2 3) (quote ()))");
    }

    #[test]
    fn test_zero_repetitions_expand_to_empty() {
        let when = make_macro("(syntax-rules () ((_ c e ...) (if c (begin e ...) '())))");
        let expanded = transform(&when, "(when #f)");
        assert_eq!(expanded.repr().to_string(), "(if #f (begin) (quote ()))");
    }

    #[test]
    fn test_literal_selects_rule() {
        let arrow = make_macro(
            "(syntax-rules (=>) ((_ a => b) (cons a b)) ((_ a b) (list a b)))",
        );
        assert_eq!(
            transform(&arrow, "(m 1 => 2)").repr().to_string(),
            "(cons 1 2)"
        );
        assert_eq!(transform(&arrow, "(m 1 2)").repr().to_string(), "(list 1 2)");
    }

    #[test]
    fn test_underscore_discards() {
        let second = make_macro("(syntax-rules () ((_ _ b) b))");
        assert_eq!(transform(&second, "(m 1 2)").repr().to_string(), "2");
    }

    #[test]
    fn test_rest_pattern() {
        let swap_tail = make_macro("(syntax-rules () ((_ a . b) (a . b)))");
        assert_eq!(
            transform(&swap_tail, "(m x y z)").repr().to_string(),
            "(x y z)"
        );
    }

    #[test]
    fn test_duplicate_variable_is_syntax_error() {
        let form = parse("(syntax-rules () ((_ a a) a))").expect("parse")[0].clone();
        let (_, tail) = form.uncons().expect("syntax-rules form");
        assert!(matches!(Macro::new(&tail), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_mismatched_ellipsis_counts() {
        let zip = make_macro("(syntax-rules () ((_ (a ...) (b ...)) ((a b) ...)))");
        let form = parse("(m (1 2 3) (4 5))").expect("parse")[0].clone();
        assert!(matches!(zip.transform(&form), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_no_matching_rule() {
        let unary = make_macro("(syntax-rules () ((_ a) a))");
        let form = parse("(m 1 2)").expect("parse")[0].clone();
        assert!(matches!(unary.transform(&form), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_nested_ellipsis() {
        let splice = make_macro("(syntax-rules () ((_ (a ...) ...) (list a ... ...)))");
        let expanded = transform(&splice, "(m (1 2) (3 4))");
        assert_eq!(expanded.repr().to_string(), "(list 1 2 3 4)");
    }
}
