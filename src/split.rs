use std::fmt;
use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

/// Words whose tops differ by no more than this share a line.
const LINE_TOP_TOLERANCE_PX: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Granularity {
    pub lines: bool,
    pub words: bool,
    pub chars: bool,
}

impl Default for Granularity {
    fn default() -> Self {
        Self::WORDS
    }
}

impl Granularity {
    pub const WORDS: Self = Self {
        lines: false,
        words: true,
        chars: false,
    };

    /// Reads a comma or whitespace separated list such as `"lines, words"`.
    /// Unknown entries are skipped; nothing recognised means words.
    pub fn parse(value: &str) -> Self {
        let mut granularity = Self {
            lines: false,
            words: false,
            chars: false,
        };

        for token in value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
        {
            match token.to_ascii_lowercase().as_str() {
                "lines" | "line" => granularity.lines = true,
                "words" | "word" => granularity.words = true,
                "chars" | "char" | "characters" => granularity.chars = true,
                _ => {}
            }
        }

        if granularity.is_empty() {
            Self::WORDS
        } else {
            granularity
        }
    }

    pub fn is_empty(self) -> bool {
        !(self.lines || self.words || self.chars)
    }

    /// Line grouping measures word boxes, so words are wrapped whenever
    /// lines are requested even if they are not asked for.
    pub fn wraps_words(self) -> bool {
        self.words || self.lines
    }

    pub fn depends_on_layout(self) -> bool {
        self.lines
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.lines {
            names.push("lines");
        }
        if self.words {
            names.push("words");
        }
        if self.chars {
            names.push("chars");
        }
        f.write_str(&names.join(","))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Word { text: String, chars: Vec<String> },
    Space(String),
}

impl Token {
    pub fn text(&self) -> &str {
        match self {
            Self::Word { text, .. } | Self::Space(text) => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitPlan {
    pub granularity: Granularity,
    pub tokens: Vec<Token>,
}

impl SplitPlan {
    pub fn build(text: &str, granularity: Granularity) -> Self {
        let mut tokens = Vec::new();
        let mut run_start = 0;
        let mut run_is_space: Option<bool> = None;

        for (index, c) in text.char_indices() {
            let is_space = c.is_whitespace();
            match run_is_space {
                Some(previous) if previous != is_space => {
                    tokens.push(make_token(&text[run_start..index], previous));
                    run_start = index;
                }
                _ => {}
            }
            run_is_space = Some(is_space);
        }
        if let Some(is_space) = run_is_space {
            tokens.push(make_token(&text[run_start..], is_space));
        }

        Self {
            granularity,
            tokens,
        }
    }

    pub fn text(&self) -> String {
        self.tokens.iter().map(Token::text).collect()
    }

    pub fn words(&self) -> impl Iterator<Item = &Token> {
        self.tokens
            .iter()
            .filter(|token| matches!(token, Token::Word { .. }))
    }

    pub fn word_count(&self) -> usize {
        self.words().count()
    }

    pub fn char_count(&self) -> usize {
        self.tokens
            .iter()
            .map(|token| match token {
                Token::Word { chars, .. } => chars.len(),
                Token::Space(_) => 0,
            })
            .sum()
    }
}

fn make_token(run: &str, is_space: bool) -> Token {
    if is_space {
        Token::Space(run.to_string())
    } else {
        Token::Word {
            text: run.to_string(),
            chars: run.graphemes(true).map(ToString::to_string).collect(),
        }
    }
}

pub fn group_lines(tops: &[f64]) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut line_start = 0;
    let mut line_top: Option<f64> = None;

    for (index, &top) in tops.iter().enumerate() {
        match line_top {
            Some(current) if (top - current).abs() <= LINE_TOP_TOLERANCE_PX => {}
            Some(_) => {
                lines.push(line_start..index);
                line_start = index;
                line_top = Some(top);
            }
            None => line_top = Some(top),
        }
    }
    if line_top.is_some() {
        lines.push(line_start..tops.len());
    }
    lines
}

pub trait Revert {
    fn revert(self, original: &str);
}

#[derive(Debug)]
pub struct SplitGuard<S: Revert> {
    active: Option<(String, S)>,
}

impl<S: Revert> Default for SplitGuard<S> {
    fn default() -> Self {
        Self { active: None }
    }
}

impl<S: Revert> SplitGuard<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_split(&self) -> bool {
        self.active.is_some()
    }

    pub fn original(&self) -> Option<&str> {
        self.active.as_ref().map(|(original, _)| original.as_str())
    }

    pub fn current(&self) -> Option<&S> {
        self.active.as_ref().map(|(_, split)| split)
    }

    pub fn split<F>(&mut self, original: &str, make: F) -> bool
    where
        F: FnOnce(&str) -> S,
    {
        let reverted = self.revert().is_some();
        let split = make(original);
        self.active = Some((original.to_string(), split));
        reverted
    }

    pub fn revert(&mut self) -> Option<String> {
        let (original, split) = self.active.take()?;
        split.revert(&original);
        Some(original)
    }
}

impl<S: Revert> Drop for SplitGuard<S> {
    fn drop(&mut self) {
        self.revert();
    }
}

const WIDTH_CHANGE_TOLERANCE_PX: f64 = 0.5;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSnapshot(Option<String>);

impl LabelSnapshot {
    pub fn capture(existing: Option<String>) -> Self {
        Self(existing)
    }

    /// `None` means the container had no label and the split's must go.
    pub fn restored(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WidthTracker {
    last: Option<f64>,
}

impl WidthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changed(&mut self, width: f64) -> bool {
        if !width.is_finite() {
            return false;
        }
        match self.last {
            None => {
                self.last = Some(width);
                false
            }
            Some(previous) if (width - previous).abs() < WIDTH_CHANGE_TOLERANCE_PX => false,
            Some(_) => {
                self.last = Some(width);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn granularity_parses_lists_and_defaults_to_words() {
        let parsed = Granularity::parse("lines, words");
        assert!(parsed.lines && parsed.words && !parsed.chars);
        assert_eq!(parsed.to_string(), "lines,words");

        assert_eq!(Granularity::parse("chars"), Granularity {
            lines: false,
            words: false,
            chars: true,
        });
        assert_eq!(Granularity::parse("glyphs ,, "), Granularity::WORDS);
        assert!(Granularity::parse("LINES").wraps_words());
        assert!(!Granularity::parse("chars").depends_on_layout());
    }

    #[test]
    fn plan_reproduces_the_text_exactly() {
        let text = "  Hello,\twörld — ok\n\nbye ";
        let plan = SplitPlan::build(text, Granularity::parse("words,chars"));

        assert_eq!(plan.text(), text);
        assert_eq!(plan.word_count(), 5);
        assert!(matches!(plan.tokens.first(), Some(Token::Space(space)) if space == "  "));
        assert!(matches!(plan.tokens.last(), Some(Token::Space(space)) if space == " "));
    }

    #[test]
    fn chars_are_grapheme_clusters() {
        let plan = SplitPlan::build("e\u{301}👍🏽x", Granularity::parse("chars"));

        assert_eq!(plan.char_count(), 3);
        match &plan.tokens[0] {
            Token::Word { chars, .. } => assert_eq!(chars[0], "e\u{301}"),
            Token::Space(_) => panic!("expected a word"),
        }
    }

    #[test]
    fn empty_text_has_no_tokens() {
        let plan = SplitPlan::build("", Granularity::WORDS);
        assert!(plan.tokens.is_empty());
        assert_eq!(plan.text(), "");
    }

    #[test]
    fn words_group_into_lines_by_measured_top() {
        assert_eq!(group_lines(&[]), Vec::<Range<usize>>::new());
        assert_eq!(
            group_lines(&[10.0, 10.0, 10.5, 34.0, 34.0, 58.0]),
            vec![0..3, 3..5, 5..6]
        );
    }

    struct FakeSplit {
        container: Rc<RefCell<String>>,
        reverts: Rc<RefCell<u32>>,
    }

    impl Revert for FakeSplit {
        fn revert(self, original: &str) {
            *self.reverts.borrow_mut() += 1;
            *self.container.borrow_mut() = original.to_string();
        }
    }

    fn fake_split(
        container: &Rc<RefCell<String>>,
        reverts: &Rc<RefCell<u32>>,
    ) -> impl FnOnce(&str) -> FakeSplit {
        let container = container.clone();
        let reverts = reverts.clone();
        move |original| {
            let plan = SplitPlan::build(original, Granularity::WORDS);
            let wrapped: Vec<String> = plan
                .tokens
                .iter()
                .map(|token| match token {
                    Token::Word { text, .. } => format!("[{text}]"),
                    Token::Space(space) => space.clone(),
                })
                .collect();
            *container.borrow_mut() = wrapped.concat();
            FakeSplit { container, reverts }
        }
    }

    #[test]
    fn resplitting_reverts_first_and_teardown_restores_text() {
        let original = "Scroll to reveal  the story.";
        let container = Rc::new(RefCell::new(original.to_string()));
        let reverts = Rc::new(RefCell::new(0));
        let mut guard = SplitGuard::new();

        assert!(!guard.split(original, fake_split(&container, &reverts)));
        assert_eq!(*container.borrow(), "[Scroll] [to] [reveal]  [the] [story.]");

        assert!(guard.split(original, fake_split(&container, &reverts)));
        assert_eq!(*reverts.borrow(), 1);
        assert!(!container.borrow().contains("[["));

        assert_eq!(guard.revert().as_deref(), Some(original));
        assert_eq!(*container.borrow(), original);
        assert_eq!(guard.revert(), None);
        assert_eq!(*reverts.borrow(), 2);
    }

    #[test]
    fn dropping_the_guard_reverts() {
        let original = "Gone soon";
        let container = Rc::new(RefCell::new(original.to_string()));
        let reverts = Rc::new(RefCell::new(0));

        {
            let mut guard = SplitGuard::new();
            guard.split(original, fake_split(&container, &reverts));
            assert_ne!(*container.borrow(), original);
        }

        assert_eq!(*container.borrow(), original);
        assert_eq!(*reverts.borrow(), 1);
    }

    struct LabelledSplit {
        label: Rc<RefCell<Option<String>>>,
        before: LabelSnapshot,
    }

    impl Revert for LabelledSplit {
        fn revert(self, _original: &str) {
            *self.label.borrow_mut() = self.before.restored().map(str::to_string);
        }
    }

    fn labelled_split(label: &Rc<RefCell<Option<String>>>) -> impl FnOnce(&str) -> LabelledSplit {
        let label = label.clone();
        move |original| {
            let before = LabelSnapshot::capture(label.borrow().clone());
            *label.borrow_mut() = Some(original.to_string());
            LabelledSplit { label, before }
        }
    }

    #[test]
    fn revert_puts_back_the_containers_own_label() {
        let label = Rc::new(RefCell::new(Some("Hero title".to_string())));
        let mut guard = SplitGuard::new();

        guard.split("Split me", labelled_split(&label));
        guard.split("Split me", labelled_split(&label));
        assert_eq!(label.borrow().as_deref(), Some("Split me"));

        guard.revert();
        assert_eq!(label.borrow().as_deref(), Some("Hero title"));

        let unlabelled = Rc::new(RefCell::new(None));
        guard.split("Split me", labelled_split(&unlabelled));
        guard.revert();
        assert_eq!(*unlabelled.borrow(), None);
    }

    #[test]
    fn width_tracker_ignores_the_initial_report_and_jitter() {
        let mut width = WidthTracker::new();

        assert!(!width.changed(612.0));
        assert!(!width.changed(612.3));
        assert!(!width.changed(f64::NAN));
        assert!(width.changed(480.0));
        assert!(!width.changed(480.0));
    }
}
