use std::f64::consts::PI;

pub const DEFAULT_DURATION_SECONDS: f64 = 0.6;
const BACK_OVERSHOOT: f64 = 1.701_58;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Curve {
    Linear,
    Power(u8),
    Sine,
    Expo,
    Circ,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    In,
    Out,
    InOut,
}

/// Easing curve named the way motion designers write them: `power2.out`,
/// `expo.inOut`, `sine.in`, `none`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ease {
    curve: Curve,
    direction: Direction,
}

impl Default for Ease {
    fn default() -> Self {
        Self {
            curve: Curve::Power(2),
            direction: Direction::Out,
        }
    }
}

impl Ease {
    pub const LINEAR: Self = Self {
        curve: Curve::Linear,
        direction: Direction::In,
    };

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let (curve_name, direction_name) = match name.split_once('.') {
            Some((curve, direction)) => (curve, Some(direction)),
            None => (name, None),
        };

        let curve = match curve_name.to_ascii_lowercase().as_str() {
            "none" | "linear" | "power0" => return Some(Self::LINEAR),
            "power1" | "quad" => Curve::Power(1),
            "power2" | "cubic" => Curve::Power(2),
            "power3" | "quart" => Curve::Power(3),
            "power4" | "quint" | "strong" => Curve::Power(4),
            "sine" => Curve::Sine,
            "expo" => Curve::Expo,
            "circ" => Curve::Circ,
            "back" => Curve::Back,
            _ => return None,
        };

        let direction = match direction_name.map(str::to_ascii_lowercase).as_deref() {
            None | Some("out") => Direction::Out,
            Some("in") => Direction::In,
            Some("inout") => Direction::InOut,
            Some(_) => return None,
        };

        Some(Self { curve, direction })
    }

    pub fn parse_or_default(name: &str) -> Self {
        Self::parse(name).unwrap_or_default()
    }

    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self.direction {
            Direction::In => self.ease_in(t),
            Direction::Out => 1.0 - self.ease_in(1.0 - t),
            Direction::InOut => {
                if t < 0.5 {
                    self.ease_in(t * 2.0) / 2.0
                } else {
                    1.0 - self.ease_in((1.0 - t) * 2.0) / 2.0
                }
            }
        }
    }

    fn ease_in(self, t: f64) -> f64 {
        match self.curve {
            Curve::Linear => t,
            Curve::Power(power) => t.powi(i32::from(power) + 1),
            Curve::Sine => 1.0 - (t * PI / 2.0).cos(),
            Curve::Expo => {
                if t <= 0.0 {
                    0.0
                } else {
                    2f64.powf(10.0 * (t - 1.0))
                }
            }
            Curve::Circ => 1.0 - (1.0 - t * t).max(0.0).sqrt(),
            Curve::Back => (BACK_OVERSHOOT + 1.0) * t * t * t - BACK_OVERSHOOT * t * t,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformState {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub scale: f64,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale: 1.0,
        }
    }
}

impl TransformState {
    fn lerp(self, to: Self, amount: f64) -> Self {
        let mix = |a: f64, b: f64| a + (b - a) * amount;
        Self {
            x: mix(self.x, to.x),
            y: mix(self.y, to.y),
            rotation: mix(self.rotation, to.rotation),
            scale: mix(self.scale, to.scale),
        }
    }

    pub fn to_css(self) -> String {
        format!(
            "translate({:.3}px, {:.3}px) rotate({:.3}deg) scale({:.4})",
            self.x, self.y, self.rotation, self.scale
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformDescriptor {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub scale: f64,
    pub duration: f64,
    pub ease: Ease,
}

impl Default for TransformDescriptor {
    fn default() -> Self {
        let rest = TransformState::default();
        Self {
            x: rest.x,
            y: rest.y,
            rotation: rest.rotation,
            scale: rest.scale,
            duration: DEFAULT_DURATION_SECONDS,
            ease: Ease::default(),
        }
    }
}

impl TransformDescriptor {
    pub fn x(mut self, x: f64) -> Self {
        self.x = x;
        self
    }

    pub fn y(mut self, y: f64) -> Self {
        self.y = y;
        self
    }

    pub fn rotation(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn ease(mut self, name: &str) -> Self {
        self.ease = Ease::parse_or_default(name);
        self
    }

    pub fn target(&self) -> TransformState {
        let finite_or = |value: f64, fallback: f64| {
            if value.is_finite() {
                value
            } else {
                fallback
            }
        };
        let rest = TransformState::default();
        TransformState {
            x: finite_or(self.x, rest.x),
            y: finite_or(self.y, rest.y),
            rotation: finite_or(self.rotation, rest.rotation),
            scale: finite_or(self.scale, rest.scale),
        }
    }

    fn duration_ms(&self) -> f64 {
        if self.duration.is_finite() && self.duration > 0.0 {
            self.duration * 1_000.0
        } else {
            0.0
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tween {
    id: u64,
    from: TransformState,
    to: TransformState,
    started_at: f64,
    duration_ms: f64,
    ease: Ease,
}

impl Tween {
    fn sample(&self, now: f64) -> (TransformState, bool) {
        let elapsed = (now - self.started_at).max(0.0);
        if elapsed >= self.duration_ms {
            return (self.to, true);
        }
        let eased = self.ease.apply(elapsed / self.duration_ms);
        (self.from.lerp(self.to, eased), false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControllerState {
    Idle,
    Animating { tween_id: u64, target: TransformState },
}

#[derive(Debug, Default)]
pub struct TransformController {
    current: TransformState,
    active: Option<Tween>,
    next_id: u64,
}

impl TransformController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> TransformState {
        self.current
    }

    pub fn state(&self) -> ControllerState {
        match self.active {
            Some(tween) => ControllerState::Animating {
                tween_id: tween.id,
                target: tween.to,
            },
            None => ControllerState::Idle,
        }
    }

    pub fn is_animating(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a tween toward `descriptor` from wherever the element is at
    /// `now`, replacing any tween in flight. A zero duration snaps.
    pub fn apply(&mut self, descriptor: &TransformDescriptor, now: f64) -> u64 {
        self.settle_to(now);

        self.next_id += 1;
        let id = self.next_id;
        let target = descriptor.target();
        let duration_ms = descriptor.duration_ms();

        if duration_ms == 0.0 {
            self.current = target;
            self.active = None;
        } else {
            self.active = Some(Tween {
                id,
                from: self.current,
                to: target,
                started_at: now,
                duration_ms,
                ease: descriptor.ease,
            });
        }
        id
    }

    pub fn tick(&mut self, now: f64) -> TransformState {
        if let Some(tween) = self.active {
            let (state, finished) = tween.sample(now);
            self.current = state;
            if finished {
                self.active = None;
            }
        }
        self.current
    }

    pub fn cancel(&mut self, now: f64) -> bool {
        let was_animating = self.active.is_some();
        self.settle_to(now);
        self.active = None;
        was_animating
    }

    fn settle_to(&mut self, now: f64) {
        if let Some(tween) = self.active {
            self.current = tween.sample(now).0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ease_names_parse_with_direction_and_aliases() {
        assert_eq!(Ease::parse("power2.out"), Some(Ease::default()));
        assert_eq!(Ease::parse("cubic"), Some(Ease::default()));
        assert_eq!(Ease::parse("none"), Some(Ease::LINEAR));
        assert!(Ease::parse("expo.inOut").is_some());
        assert_eq!(Ease::parse("bounce.out"), None);
        assert_eq!(Ease::parse("power2.sideways"), None);
        assert_eq!(Ease::parse_or_default("wobble"), Ease::default());
    }

    #[test]
    fn every_curve_starts_at_zero_and_ends_at_one() {
        for name in [
            "none", "power1.in", "power2.out", "power3.inOut", "power4", "sine.inOut",
            "expo.in", "expo.out", "circ.inOut", "back.out",
        ] {
            let ease = Ease::parse(name).expect("known ease");
            assert!(ease.apply(0.0).abs() < 1e-9, "{name} at 0");
            assert!((ease.apply(1.0) - 1.0).abs() < 1e-9, "{name} at 1");
        }

        let linear = Ease::LINEAR;
        assert_eq!(linear.apply(0.25), 0.25);
        assert!(Ease::parse("back.out").expect("back").apply(0.7) > 1.0);
    }

    #[test]
    fn unset_descriptor_fields_take_resting_defaults() {
        let descriptor = TransformDescriptor::default().x(40.0).scale(f64::NAN);
        let target = descriptor.target();

        assert_eq!(target.x, 40.0);
        assert_eq!(target.y, 0.0);
        assert_eq!(target.rotation, 0.0);
        assert_eq!(target.scale, 1.0);
        assert_eq!(descriptor.duration, DEFAULT_DURATION_SECONDS);
    }

    #[test]
    fn tween_runs_idle_animating_idle() {
        let mut controller = TransformController::new();
        assert_eq!(controller.state(), ControllerState::Idle);

        let descriptor = TransformDescriptor::default().x(100.0).duration(1.0).ease("none");
        let id = controller.apply(&descriptor, 0.0);
        assert!(matches!(
            controller.state(),
            ControllerState::Animating { tween_id, .. } if tween_id == id
        ));

        assert_eq!(controller.tick(500.0).x, 50.0);
        assert_eq!(controller.tick(1_000.0).x, 100.0);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn second_apply_supersedes_first_without_snapping() {
        let mut controller = TransformController::new();
        let first = TransformDescriptor::default().x(100.0).duration(1.0).ease("none");
        let second = TransformDescriptor::default().x(-100.0).duration(1.0).ease("none");

        controller.apply(&first, 0.0);
        let before_redirect = controller.tick(200.0);
        let second_id = controller.apply(&second, 200.0);

        assert_eq!(controller.current(), before_redirect);
        assert_eq!(
            controller.state(),
            ControllerState::Animating {
                tween_id: second_id,
                target: second.target(),
            }
        );

        let mut now = 200.0;
        while controller.is_animating() {
            now += 16.0;
            let state = controller.tick(now);
            assert!(state.x < 100.0);
        }
        assert_eq!(controller.current().x, -100.0);
    }

    #[test]
    fn back_to_back_applies_leave_one_tween_on_the_second_target() {
        let mut controller = TransformController::new();
        controller.apply(&TransformDescriptor::default().y(30.0), 0.0);
        let second = TransformDescriptor::default().y(-30.0).rotation(90.0);
        let id = controller.apply(&second, 0.0);

        assert_eq!(
            controller.state(),
            ControllerState::Animating {
                tween_id: id,
                target: second.target(),
            }
        );
        assert_eq!(controller.tick(10_000.0), second.target());
    }

    #[test]
    fn zero_duration_snaps_immediately() {
        let mut controller = TransformController::new();
        controller.apply(&TransformDescriptor::default().x(10.0).duration(0.0), 5.0);

        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.current().x, 10.0);
    }

    #[test]
    fn cancel_freezes_at_the_interpolated_state() {
        let mut controller = TransformController::new();
        controller.apply(
            &TransformDescriptor::default().scale(2.0).duration(1.0).ease("linear"),
            0.0,
        );

        assert!(controller.cancel(250.0));
        assert_eq!(controller.current().scale, 1.25);
        assert_eq!(controller.tick(5_000.0).scale, 1.25);
        assert!(!controller.cancel(6_000.0));
    }

    #[test]
    fn css_output_lists_every_component() {
        let css = TransformState {
            x: 1.0,
            y: -2.5,
            rotation: 45.0,
            scale: 0.5,
        }
        .to_css();

        assert_eq!(css, "translate(1.000px, -2.500px) rotate(45.000deg) scale(0.5000)");
    }
}
