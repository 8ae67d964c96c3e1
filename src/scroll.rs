pub const DEFAULT_START: &str = "top bottom";
pub const DEFAULT_END: &str = "bottom top";

/// One viewport above and below: the band where smooth scrub animates.
pub const OBSERVATION_ROOT_MARGIN: &str = "100% 0px";

const SETTLE_EPSILON: f64 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq)]
enum EdgeBase {
    Ratio(f64),
    Pixels(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Edge {
    base: EdgeBase,
    offset: f64,
}

impl Edge {
    fn parse(token: &str) -> Option<Self> {
        let (base, offset) = match token.find("+=").or_else(|| token.find("-=")) {
            Some(index) => {
                let sign = if token[index..].starts_with('-') { -1.0 } else { 1.0 };
                let amount = parse_pixels(&token[index + 2..])?;
                (&token[..index], sign * amount)
            }
            None => (token, 0.0),
        };

        let base = match base {
            "top" | "left" => EdgeBase::Ratio(0.0),
            "center" => EdgeBase::Ratio(0.5),
            "bottom" | "right" => EdgeBase::Ratio(1.0),
            other => match other.strip_suffix('%') {
                Some(percent) => EdgeBase::Ratio(parse_finite(percent)? / 100.0),
                None => EdgeBase::Pixels(parse_pixels(other)?),
            },
        };

        Some(Self { base, offset })
    }

    fn resolve(self, extent: f64) -> f64 {
        let base = match self.base {
            EdgeBase::Ratio(ratio) => ratio * extent,
            EdgeBase::Pixels(pixels) => pixels,
        };
        base + self.offset
    }
}

fn parse_pixels(value: &str) -> Option<f64> {
    parse_finite(value.strip_suffix("px").unwrap_or(value))
}

fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|number| number.is_finite())
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    element: Edge,
    viewport: Edge,
}

impl Boundary {
    pub fn parse(descriptor: &str) -> Option<Self> {
        let mut tokens = descriptor.split_whitespace();
        let element = Edge::parse(tokens.next()?)?;
        let viewport = Edge::parse(tokens.next()?)?;
        if tokens.next().is_some() {
            return None;
        }
        Some(Self { element, viewport })
    }

    fn parse_or(descriptor: &str, fallback: &str) -> Self {
        Self::parse(descriptor)
            .or_else(|| Self::parse(fallback))
            .unwrap_or(Self {
                element: Edge {
                    base: EdgeBase::Ratio(0.0),
                    offset: 0.0,
                },
                viewport: Edge {
                    base: EdgeBase::Ratio(1.0),
                    offset: 0.0,
                },
            })
    }

    pub fn resolve(self, geometry: TriggerGeometry) -> f64 {
        self.element_line(geometry) - self.viewport_line(geometry)
    }

    pub fn element_line(self, geometry: TriggerGeometry) -> f64 {
        geometry.element_top + self.element.resolve(geometry.element_height)
    }

    pub fn viewport_line(self, geometry: TriggerGeometry) -> f64 {
        self.viewport.resolve(geometry.viewport_height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerLines {
    pub start_element: f64,
    pub end_element: f64,
    pub start_viewport: f64,
    pub end_viewport: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TriggerGeometry {
    pub element_top: f64,
    pub element_height: f64,
    pub viewport_height: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScrollRange {
    pub start: f64,
    pub end: f64,
}

impl ScrollRange {
    pub fn is_zero_length(self) -> bool {
        self.end <= self.start
    }

    pub fn progress_at(self, scroll: f64) -> f64 {
        if self.is_zero_length() {
            return if scroll >= self.start { 1.0 } else { 0.0 };
        }
        ((scroll - self.start) / (self.end - self.start)).clamp(0.0, 1.0)
    }

    fn phase_at(self, scroll: f64) -> Phase {
        if scroll < self.start {
            Phase::Before
        } else if self.is_zero_length() || scroll > self.end {
            Phase::After
        } else {
            Phase::Active
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scrub {
    Off,
    Immediate,
    /// Displayed progress trails scroll with this time constant in seconds.
    Smooth(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScrollTriggerConfig {
    pub start: String,
    pub end: String,
    pub scrub: Scrub,
    pub markers: bool,
}

impl Default for ScrollTriggerConfig {
    fn default() -> Self {
        Self {
            start: DEFAULT_START.to_string(),
            end: DEFAULT_END.to_string(),
            scrub: Scrub::Off,
            markers: false,
        }
    }
}

impl ScrollTriggerConfig {
    fn boundaries(&self) -> (Boundary, Boundary) {
        (
            Boundary::parse_or(&self.start, DEFAULT_START),
            Boundary::parse_or(&self.end, DEFAULT_END),
        )
    }

    pub fn range(&self, geometry: TriggerGeometry) -> ScrollRange {
        let (start, end) = self.boundaries();
        ScrollRange {
            start: start.resolve(geometry),
            end: end.resolve(geometry),
        }
    }

    pub fn marker_lines(&self, geometry: TriggerGeometry) -> MarkerLines {
        let (start, end) = self.boundaries();
        MarkerLines {
            start_element: start.element_line(geometry),
            end_element: end.element_line(geometry),
            start_viewport: start.viewport_line(geometry),
            end_viewport: end.viewport_line(geometry),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Before,
    Active,
    After,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    Enter,
    Leave,
    EnterBack,
    LeaveBack,
}

fn transition_events(from: Phase, to: Phase) -> Vec<TriggerEvent> {
    use Phase::*;
    use TriggerEvent::*;

    match (from, to) {
        (Before, Active) => vec![Enter],
        (Before, After) => vec![Enter, Leave],
        (Active, After) => vec![Leave],
        (After, Active) => vec![EnterBack],
        (After, Before) => vec![EnterBack, LeaveBack],
        (Active, Before) => vec![LeaveBack],
        _ => Vec::new(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScrollStep {
    pub events: Vec<TriggerEvent>,
    pub animate: bool,
}

#[derive(Clone, Debug)]
pub struct ScrollTrigger {
    config: ScrollTriggerConfig,
    range: ScrollRange,
    scroll: f64,
    phase: Phase,
    target_progress: f64,
    displayed_progress: f64,
}

impl ScrollTrigger {
    pub fn new(
        config: ScrollTriggerConfig,
        geometry: TriggerGeometry,
        scroll: f64,
    ) -> (Self, Vec<TriggerEvent>) {
        let range = config.range(geometry);
        let progress = range.progress_at(scroll);
        let phase = range.phase_at(scroll);

        let trigger = Self {
            config,
            range,
            scroll,
            phase,
            target_progress: progress,
            displayed_progress: progress,
        };
        (trigger, transition_events(Phase::Before, phase))
    }

    pub fn config(&self) -> &ScrollTriggerConfig {
        &self.config
    }

    pub fn range(&self) -> ScrollRange {
        self.range
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn scroll(&self) -> f64 {
        self.scroll
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn progress(&self) -> f64 {
        self.displayed_progress
    }

    pub fn target_progress(&self) -> f64 {
        self.target_progress
    }

    pub fn is_settling(&self) -> bool {
        (self.target_progress - self.displayed_progress).abs() > SETTLE_EPSILON
    }

    pub fn update(&mut self, scroll: f64) -> Vec<TriggerEvent> {
        self.scroll = scroll;
        self.target_progress = self.range.progress_at(scroll);
        if !matches!(self.config.scrub, Scrub::Smooth(_)) {
            self.displayed_progress = self.target_progress;
        }

        let next = self.range.phase_at(scroll);
        let events = transition_events(self.phase, next);
        self.phase = next;
        events
    }

    /// Handles one scroll event. The range is cached, so every event is
    /// applied wherever the element is; `near_viewport` only decides whether
    /// smooth scrub animates toward the new target or jumps to it.
    pub fn scrolled_to(&mut self, scroll: f64, near_viewport: bool) -> ScrollStep {
        let events = self.update(scroll);
        if !near_viewport {
            self.displayed_progress = self.target_progress;
        }
        ScrollStep {
            events,
            animate: near_viewport && self.is_settling(),
        }
    }

    pub fn refresh(&mut self, geometry: TriggerGeometry, scroll: f64) -> Vec<TriggerEvent> {
        self.range = self.config.range(geometry);
        self.update(scroll)
    }

    /// Advances smooth scrubbing by `dt` seconds. Returns whether the
    /// displayed progress is still moving.
    pub fn advance(&mut self, dt: f64) -> bool {
        let Scrub::Smooth(time_constant) = self.config.scrub else {
            return false;
        };

        if time_constant <= 0.0 || !time_constant.is_finite() {
            self.displayed_progress = self.target_progress;
            return false;
        }

        let alpha = 1.0 - (-dt.max(0.0) / time_constant).exp();
        self.displayed_progress += (self.target_progress - self.displayed_progress) * alpha;
        if !self.is_settling() {
            self.displayed_progress = self.target_progress;
        }
        self.is_settling()
    }
}
