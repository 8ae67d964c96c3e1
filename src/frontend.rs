pub mod dom;
pub mod hooks;

use web_sys::window;
use yew::prelude::*;

use crate::logging::{log_event, LogLevel};
use crate::observe::ObserverOptions;
use crate::scroll::{Scrub, ScrollTriggerConfig, TriggerEvent};
use crate::split::Granularity;
use crate::tween::TransformDescriptor;
use hooks::{
    use_device, use_in_view, use_prefetch_on_visible, use_report_web_vitals, use_scroll_trigger,
    use_split_text, use_transform, SplitStatus,
};

fn event_label(event: Option<TriggerEvent>) -> &'static str {
    match event {
        Some(TriggerEvent::Enter) => "enter",
        Some(TriggerEvent::Leave) => "leave",
        Some(TriggerEvent::EnterBack) => "enter-back",
        Some(TriggerEvent::LeaveBack) => "leave-back",
        None => "idle",
    }
}

#[function_component(Headline)]
fn headline() -> Html {
    let split = use_split_text(
        AttrValue::from("Motion that waits for the reader"),
        Granularity::parse("lines, words"),
    );

    let status = match &split.status {
        SplitStatus::Pending => "splitting".to_string(),
        SplitStatus::Ready(counts) => format!("{} lines, {} words", counts.lines, counts.words),
        SplitStatus::Failed(_) => "unsplit".to_string(),
    };

    html! {
        <header class="hero">
            <h1 class="headline" ref={split.node.clone()}></h1>
            <p class="muted" aria-live="polite">{status}</p>
        </header>
    }
}

#[function_component(RevealCard)]
fn reveal_card() -> Html {
    let view = use_in_view(
        ObserverOptions::default()
            .with_thresholds(&[0.25])
            .once(),
    );

    html! {
        <section
            ref={view.node.clone()}
            class={classes!("section-block", "reveal", view.in_view().then_some("is-visible"))}
        >
            <h2>{"Revealed once"}</h2>
            <p>{"This block fades in the first time a quarter of it is visible."}</p>
        </section>
    }
}

#[function_component(ScrubbedBar)]
fn scrubbed_bar() -> Html {
    let trigger = use_scroll_trigger(ScrollTriggerConfig {
        start: "top 80%".to_string(),
        end: "bottom 20%".to_string(),
        scrub: Scrub::Smooth(0.4),
        markers: cfg!(debug_assertions),
    });

    let style = format!("transform: scaleX({:.4});", trigger.progress);

    html! {
        <section ref={trigger.node.clone()} class="section-block scrubbed">
            <h2>{"Scrubbed progress"}</h2>
            <div class="progress-track" aria-hidden="true">
                <div class="progress-fill" style={style}></div>
            </div>
            <p class="muted">
                {format!("{:.0}% · {}", trigger.progress * 100.0, event_label(trigger.last_event))}
            </p>
        </section>
    }
}

#[function_component(Nudge)]
fn nudge() -> Html {
    let transform = use_transform();
    let flipped = use_state(|| false);

    let onclick = {
        let apply = transform.apply.clone();
        let flipped = flipped.clone();
        Callback::from(move |_| {
            let next = !*flipped;
            let descriptor = if next {
                TransformDescriptor::default()
                    .x(48.0)
                    .rotation(8.0)
                    .scale(1.08)
                    .ease("back.out")
            } else {
                TransformDescriptor::default().duration(0.4).ease("expo.inOut")
            };
            apply.emit(descriptor);
            flipped.set(next);
        })
    };

    html! {
        <section class="section-block">
            <h2>{"Transform"}</h2>
            <button type="button" class="nudge" ref={transform.node.clone()} {onclick}>
                {if *flipped { "Bring it back" } else { "Nudge me" }}
            </button>
        </section>
    }
}

#[derive(Properties, PartialEq)]
struct PrefetchLinkProps {
    href: AttrValue,
    label: AttrValue,
}

#[function_component(PrefetchLink)]
fn prefetch_link(props: &PrefetchLinkProps) -> Html {
    let node = use_prefetch_on_visible(props.href.clone());

    html! {
        <a class="link" ref={node} href={props.href.clone()}>{props.label.clone()}</a>
    }
}

#[function_component(App)]
fn app() -> Html {
    let device = use_device();
    use_report_web_vitals();

    html! {
        <div class="page-shell" data-viewport={device.label()}>
            <Headline />
            <main id="content">
                <RevealCard />
                <ScrubbedBar />
                <Nudge />
                <nav class="section-block" aria-label="More">
                    <PrefetchLink href="/about" label="About" />
                    <PrefetchLink href="/journal" label="Journal" />
                </nav>
            </main>
        </div>
    }
}

pub fn run() {
    let Some(root) = window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id("app"))
    else {
        log_event(
            LogLevel::Warn,
            "mount_point_missing",
            serde_json::json!({ "id": "app" }),
        );
        return;
    };

    yew::Renderer::<App>::with_root(root).render();
}
