//! bevy + bevy_llm_chat example against groq.
//! - api key field (masked), model selector, clear button.
//! - full transcript from `ChatHistory`; the in-flight answer renders
//!   below it with a trailing cursor until the stream ends.
//! - tab switches focus between the key field and the prompt; enter applies
//!   the key or sends the prompt.
//!
//! seed the key with `GROQ_API_KEY` (and optionally `GROQ_MODEL`).

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy_llm_chat::{
    ActiveTurn, ChatHistory, ChatPlugin, ChatSettings, ChatUpdate, ChatUpdateEvt, ClearConversation,
    PipelineStatus, SubmitQuestion, submit_question,
};

const EXAMPLE_QUESTIONS: [&str; 4] = [
    "What is LangChain?",
    "Explain Groq's LPU technology",
    "How do I learn programming?",
    "Write a haiku about AI",
];

const BTN_IDLE: Color = Color::srgb(0.2, 0.2, 0.25);
const BTN_HOVER: Color = Color::srgb(0.25, 0.25, 0.3);
const BTN_PRESSED: Color = Color::srgb(0.3, 0.3, 0.35);

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct TranscriptText;
#[derive(Component)]
struct StreamText;
#[derive(Component)]
struct PromptText;
#[derive(Component)]
struct ApiKeyText;
#[derive(Component)]
struct ModelText;
#[derive(Component)]
struct WarningText;

#[derive(Component)]
struct BtnPrevModel;
#[derive(Component)]
struct BtnNextModel;
#[derive(Component)]
struct BtnClear;
#[derive(Component)]
struct BtnExample(&'static str);

// ---------------------- app state ----------------------

#[derive(Resource, Default)]
struct PromptBuf(String);

/// key being typed; applied to `ChatSettings` on enter.
#[derive(Resource, Default)]
struct KeyBuf(String);

/// what the line under the transcript shows.
#[derive(Resource, Default)]
struct StreamLine(String);

#[derive(Resource, Default)]
struct Focus(FocusField);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum FocusField {
    ApiKey,
    #[default]
    Prompt,
}

// ---------------------- main ----------------------

fn main() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let settings = ChatSettings::from_env();
    let key_buf = KeyBuf(settings.api_key.clone());
    let focus = if settings.is_configured() {
        FocusField::Prompt
    } else {
        FocusField::ApiKey
    };

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(settings)
        .insert_resource(key_buf)
        .insert_resource(Focus(focus))
        .insert_resource(PromptBuf::default())
        .insert_resource(StreamLine::default())
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "LangChain chatbot with Groq".into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(ChatPlugin)
        .add_systems(Startup, setup)
        .add_systems(
            Update,
            (
                handle_text_input,
                btn_prev_model,
                btn_next_model,
                btn_clear,
                btn_examples,
                refresh_config_texts,
                refresh_prompt_text,
            ),
        )
        // event readers should run after the plugin emits updates
        .add_systems(
            Update,
            (on_update, refresh_transcript, refresh_stream_text)
                .chain()
                .after(bevy_llm_chat::ChatSet::Pump),
        )
        .run();
}

// ---------------------- setup ui ----------------------

fn spawn_button(
    parent: &mut ChildSpawnerCommands,
    label: &str,
    width: Val,
    font: &TextFont,
    marker: impl Bundle,
) {
    parent
        .spawn((
            Button,
            Node {
                width,
                height: Val::Px(28.0),
                padding: UiRect::horizontal(Val::Px(8.0)),
                align_items: AlignItems::Center,
                justify_content: JustifyContent::Center,
                ..default()
            },
            BackgroundColor(BTN_IDLE),
            marker,
        ))
        .with_children(|b| {
            b.spawn((Text::new(label), font.clone(), TextColor(Color::WHITE)));
        });
}

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d);

    let style_24 = TextFont { font_size: 24.0, ..default() };
    let style_18 = TextFont { font_size: 18.0, ..default() };
    let style_14 = TextFont { font_size: 14.0, ..default() };

    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(8.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(Color::NONE),
        ))
        .with_children(|p| {
            p.spawn((
                Text::new("Simple LangChain Chat with Groq"),
                style_24.clone(),
                TextColor(Color::WHITE),
            ));

            // --- settings box ---
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(6.0),
                    padding: UiRect::all(Val::Px(8.0)),
                    ..default()
                },
                BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
            ))
            .with_children(|c| {
                c.spawn((Text::new(""), style_14.clone(), TextColor(Color::WHITE), ApiKeyText));

                // row: [<] model [>] [clear conversation]
                c.spawn((
                    Node {
                        width: Val::Percent(100.0),
                        column_gap: Val::Px(8.0),
                        flex_direction: FlexDirection::Row,
                        align_items: AlignItems::Center,
                        ..default()
                    },
                    BackgroundColor(Color::NONE),
                ))
                .with_children(|row| {
                    spawn_button(row, "<", Val::Px(28.0), &style_14, BtnPrevModel);
                    row.spawn((Text::new("model: "), style_14.clone(), TextColor(Color::WHITE), ModelText));
                    spawn_button(row, ">", Val::Px(28.0), &style_14, BtnNextModel);
                    spawn_button(row, "clear conversation", Val::Auto, &style_14, BtnClear);
                });
            });

            p.spawn((
                Text::new(""),
                style_14.clone(),
                TextColor(Color::srgb_u8(240, 200, 80)),
                WarningText,
            ));

            // --- conversation box ---
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_grow: 1.0,
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(8.0),
                    padding: UiRect::axes(Val::Px(8.0), Val::Px(12.0)),
                    overflow: Overflow::clip_y(),
                    ..default()
                },
                BackgroundColor(Color::NONE),
            ))
            .with_children(|c| {
                c.spawn((Text::new(""), style_18.clone(), TextColor(Color::WHITE), TranscriptText));
                c.spawn((
                    Text::new(""),
                    style_18.clone(),
                    TextColor(Color::srgb_u8(200, 200, 200)),
                    StreamText,
                ));
                c.spawn((Text::new("> "), style_14.clone(), TextColor(Color::WHITE), PromptText));
            });

            // --- examples ---
            p.spawn((Text::new("Try these examples:"), style_14.clone(), TextColor(Color::WHITE)));
            p.spawn(Node {
                width: Val::Percent(100.0),
                column_gap: Val::Px(8.0),
                flex_direction: FlexDirection::Row,
                flex_wrap: FlexWrap::Wrap,
                ..default()
            })
            .with_children(|row| {
                for q in EXAMPLE_QUESTIONS {
                    spawn_button(row, q, Val::Auto, &style_14, BtnExample(q));
                }
            });
        });
}

// ---------------------- input & buttons ----------------------

fn handle_text_input(
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut focus: ResMut<Focus>,
    mut key_buf: ResMut<KeyBuf>,
    mut prompt: ResMut<PromptBuf>,
    mut settings: ResMut<ChatSettings>,
    status: Res<PipelineStatus>,
    active: Res<ActiveTurn>,
    mut submit: EventWriter<SubmitQuestion>,
    mut line: ResMut<StreamLine>,
) {
    if keys.just_pressed(KeyCode::Tab) {
        focus.0 = match focus.0 {
            FocusField::ApiKey => FocusField::Prompt,
            FocusField::Prompt => FocusField::ApiKey,
        };
        info!(target: "chat", "focus -> {:?}", focus.0);
    }

    for ev in ev_kbd.read() {
        if ev.state.is_pressed()
            && let Some(txt) = &ev.text
        {
            let s = txt.replace(['\r', '\n', '\t'], "");
            match focus.0 {
                FocusField::ApiKey => key_buf.0.push_str(&s),
                FocusField::Prompt => prompt.0.push_str(&s),
            }
        }
    }

    if keys.just_pressed(KeyCode::Backspace) {
        match focus.0 {
            FocusField::ApiKey => {
                key_buf.0.pop();
            }
            FocusField::Prompt => {
                prompt.0.pop();
            }
        }
    }

    if keys.just_pressed(KeyCode::Enter) {
        match focus.0 {
            FocusField::ApiKey => {
                let key = key_buf.0.trim().to_string();
                if settings.api_key != key {
                    info!(target: "chat", "applying api key (present={})", !key.is_empty());
                    settings.api_key = key;
                }
                focus.0 = FocusField::Prompt;
            }
            FocusField::Prompt => {
                // the chat input only exists once a key is configured
                if !matches!(*status, PipelineStatus::Ready { .. }) || active.is_streaming() {
                    return;
                }
                if !prompt.0.trim().is_empty() {
                    let msg = std::mem::take(&mut prompt.0);
                    line.0.clear();
                    submit_question(&mut submit, msg);
                }
            }
        }
    }
}

fn btn_prev_model(
    mut q: Query<(&Interaction, &mut BackgroundColor), (Changed<Interaction>, With<BtnPrevModel>)>,
    mut settings: ResMut<ChatSettings>,
) {
    for (i, mut bg) in &mut q {
        match *i {
            Interaction::Pressed => {
                bg.0 = BTN_PRESSED;
                settings.model = settings.model.prev();
                info!(target: "chat", "prev model -> '{}'", settings.model);
            }
            Interaction::Hovered => bg.0 = BTN_HOVER,
            Interaction::None => bg.0 = BTN_IDLE,
        }
    }
}

fn btn_next_model(
    mut q: Query<(&Interaction, &mut BackgroundColor), (Changed<Interaction>, With<BtnNextModel>)>,
    mut settings: ResMut<ChatSettings>,
) {
    for (i, mut bg) in &mut q {
        match *i {
            Interaction::Pressed => {
                bg.0 = BTN_PRESSED;
                settings.model = settings.model.next();
                info!(target: "chat", "next model -> '{}'", settings.model);
            }
            Interaction::Hovered => bg.0 = BTN_HOVER,
            Interaction::None => bg.0 = BTN_IDLE,
        }
    }
}

fn btn_clear(
    mut q: Query<(&Interaction, &mut BackgroundColor), (Changed<Interaction>, With<BtnClear>)>,
    mut clear: EventWriter<ClearConversation>,
    mut line: ResMut<StreamLine>,
) {
    for (i, mut bg) in &mut q {
        match *i {
            Interaction::Pressed => {
                bg.0 = BTN_PRESSED;
                info!(target: "chat", "clear conversation");
                clear.write(ClearConversation);
                line.0.clear();
            }
            Interaction::Hovered => bg.0 = BTN_HOVER,
            Interaction::None => bg.0 = BTN_IDLE,
        }
    }
}

fn btn_examples(
    mut q: Query<(&Interaction, &BtnExample, &mut BackgroundColor), Changed<Interaction>>,
    status: Res<PipelineStatus>,
    active: Res<ActiveTurn>,
    mut submit: EventWriter<SubmitQuestion>,
    mut line: ResMut<StreamLine>,
) {
    for (i, BtnExample(question), mut bg) in &mut q {
        match *i {
            Interaction::Pressed => {
                bg.0 = BTN_PRESSED;
                if matches!(*status, PipelineStatus::Ready { .. }) && !active.is_streaming() {
                    line.0.clear();
                    submit_question(&mut submit, *question);
                }
            }
            Interaction::Hovered => bg.0 = BTN_HOVER,
            Interaction::None => bg.0 = BTN_IDLE,
        }
    }
}

// ---------------------- text refresh ----------------------

fn refresh_config_texts(
    settings: Res<ChatSettings>,
    key_buf: Res<KeyBuf>,
    focus: Res<Focus>,
    status: Res<PipelineStatus>,
    mut sets: ParamSet<(
        Query<&mut Text, With<ApiKeyText>>,
        Query<&mut Text, With<ModelText>>,
        Query<&mut Text, With<WarningText>>,
    )>,
) {
    if !(settings.is_changed() || key_buf.is_changed() || focus.is_changed() || status.is_changed()) {
        return;
    }
    if let Ok(mut t) = sets.p0().single_mut() {
        let caret = if matches!(focus.0, FocusField::ApiKey) { " |" } else { "" };
        // never echo the key itself
        let masked = if key_buf.0.is_empty() {
            "<empty>".to_string()
        } else {
            "*".repeat(key_buf.0.chars().count())
        };
        t.0 = format!("GROQ API key: {masked}{caret}");
    }
    if let Ok(mut t) = sets.p1().single_mut() {
        t.0 = format!("model: {}", settings.model);
    }
    if let Ok(mut t) = sets.p2().single_mut() {
        t.0 = match &*status {
            PipelineStatus::NotConfigured => {
                "Please enter your Groq API key above (tab, type, enter) to start chatting! \
                 You can get a free key at https://console.groq.com/"
                    .to_string()
            }
            PipelineStatus::Broken { error } => format!("Error: {error}"),
            PipelineStatus::Ready { .. } => String::new(),
        };
    }
}

fn refresh_prompt_text(
    prompt: Res<PromptBuf>,
    focus: Res<Focus>,
    mut q_prompt: Query<&mut Text, With<PromptText>>,
) {
    if (prompt.is_changed() || focus.is_changed())
        && let Ok(mut t) = q_prompt.single_mut()
    {
        let caret = if matches!(focus.0, FocusField::Prompt) { " |" } else { "" };
        let hint = if prompt.0.is_empty() { "Ask me anything!" } else { "" };
        t.0 = format!("> {}{}{}", prompt.0, hint, caret);
    }
}

// ---------------------- chat updates ----------------------

fn on_update(mut ev: EventReader<ChatUpdateEvt>, mut line: ResMut<StreamLine>) {
    // only the latest update per frame matters
    if let Some(ChatUpdateEvt { update }) = ev.read().last() {
        line.0 = match update {
            // the finished answer is now part of the transcript
            ChatUpdate::Finished(_) => String::new(),
            other => format!("assistant: {}", other.render()),
        };
    }
}

fn refresh_transcript(
    history: Res<ChatHistory>,
    status: Res<PipelineStatus>,
    mut q: Query<&mut Text, With<TranscriptText>>,
) {
    if !(history.is_changed() || status.is_changed()) {
        return;
    }
    let Ok(mut t) = q.single_mut() else {
        return;
    };
    // the transcript is hidden until the chat is usable
    if !matches!(*status, PipelineStatus::Ready { .. }) {
        t.0.clear();
        return;
    }
    let mut out = String::new();
    for turn in history.all() {
        out.push_str(turn.role.as_str());
        out.push_str(": ");
        out.push_str(&turn.content);
        out.push('\n');
    }
    t.0 = out;
}

fn refresh_stream_text(line: Res<StreamLine>, mut q: Query<&mut Text, With<StreamText>>) {
    if line.is_changed()
        && let Ok(mut t) = q.single_mut()
    {
        t.0 = line.0.clone();
    }
}
