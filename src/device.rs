pub const TABLET_MIN_WIDTH: f64 = 768.0;
pub const DESKTOP_MIN_WIDTH: f64 = 1024.0;
pub const TOUCH_MEDIA_QUERY: &str = "(hover: none) and (pointer: coarse)";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewportClassification {
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub is_desktop: bool,
    pub is_touch: bool,
}

impl ViewportClassification {
    pub fn label(self) -> &'static str {
        if self.is_mobile {
            "mobile"
        } else if self.is_tablet {
            "tablet"
        } else {
            "desktop"
        }
    }
}

pub fn classify(width: f64, is_touch: bool) -> ViewportClassification {
    let width = if width.is_finite() { width } else { DESKTOP_MIN_WIDTH };

    ViewportClassification {
        is_mobile: width < TABLET_MIN_WIDTH,
        is_tablet: (TABLET_MIN_WIDTH..DESKTOP_MIN_WIDTH).contains(&width),
        is_desktop: width >= DESKTOP_MIN_WIDTH,
        is_touch,
    }
}

#[derive(Debug, Default)]
pub struct DeviceTracker {
    width: f64,
    is_touch: bool,
    current: Option<ViewportClassification>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ViewportClassification> {
        self.current
    }

    pub fn update(&mut self, width: f64, is_touch: bool) -> Option<ViewportClassification> {
        self.width = width;
        self.is_touch = is_touch;

        let next = classify(width, is_touch);
        if self.current == Some(next) {
            return None;
        }

        self.current = Some(next);
        Some(next)
    }

    pub fn update_width(&mut self, width: f64) -> Option<ViewportClassification> {
        self.update(width, self.is_touch)
    }

    pub fn update_touch(&mut self, is_touch: bool) -> Option<ViewportClassification> {
        self.update(self.width, is_touch)
    }
}
