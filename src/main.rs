use std::sync::Arc;

use learningtoy_client::config::Config;
use learningtoy_client::logging::init_tracing;
use learningtoy_client::selection::SelectionNotice;
use learningtoy_client::store::LocalStore;
use learningtoy_client::{ClientState, HttpLearningApi, LearningApi};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config);

    let store = match LocalStore::open(&config.state_dir) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(error = %err, "state dir unusable, nothing will be remembered");
            Arc::new(LocalStore::in_memory())
        }
    };

    let api = match HttpLearningApi::shared(&config) {
        Ok(api) => api,
        Err(err) => {
            tracing::error!(error = %err, "backend client unavailable");
            return;
        }
    };

    let state = ClientState::new(&config, api, store);
    tracing::info!(api_url = %config.api_url, "device client started");

    let account = state.account();
    let restored = account.restore_token();
    let credentials = (
        std::env::var("LEARNINGTOY_EMAIL"),
        std::env::var("LEARNINGTOY_PASSWORD"),
    );
    if let (Ok(email), Ok(password)) = credentials {
        match account.login(&email, &password).await {
            Ok(signed_in) => {
                for child in &signed_in.children {
                    println!("child\t{}\t{}", child.id, child.name);
                }
            }
            Err(err) => tracing::error!(error = %err, "sign-in failed"),
        }
    } else if restored || config.api_token.is_some() {
        if let Err(err) = account.fetch_children().await {
            tracing::warn!(error = %err, "children not loaded");
        }
    } else {
        tracing::warn!("not signed in, requests are anonymous");
    }

    if let Ok(child_id) = std::env::var("LEARNINGTOY_CHILD_ID") {
        if let Err(err) = state.selection().select_child(&child_id) {
            tracing::warn!(error = %err, "active child not saved");
        }
    }

    let selection = state.selection();
    let Some(child_id) = selection.view().child_id else {
        tracing::info!("no active child, sign in or set LEARNINGTOY_CHILD_ID");
        return;
    };

    let Ok(domain_id) = std::env::var("LEARNINGTOY_DOMAIN_ID") else {
        match state.api().list_domains(true).await {
            Ok(domains) => {
                for domain in domains {
                    println!("{}\t{}\t{} words", domain.id, domain.name, domain.word_count);
                }
            }
            Err(err) => tracing::error!(error = %err, "domains not loaded"),
        }
        return;
    };

    match state.graphs().graph(&domain_id).await {
        Ok(graph) => tracing::info!(
            domain_id,
            nodes = graph.nodes.len(),
            levels = graph.levels.len(),
            "learning graph loaded"
        ),
        Err(err) => tracing::warn!(domain_id, error = %err, "learning graph not loaded"),
    }

    match selection.load_domain(&domain_id).await {
        Ok(view) => match (&view.word, &view.notice) {
            (Some(word), _) => println!(
                "{}\t{}\t{}",
                word.id,
                view.prompt.as_deref().unwrap_or("?"),
                view.status_label().unwrap_or("")
            ),
            (None, Some(SelectionNotice::NoFurtherWords)) => println!("no further words"),
            (None, _) => println!("nothing to practise"),
        },
        Err(err) => {
            tracing::error!(domain_id, error = %err, "domain not loaded");
            println!("{}", err.user_message());
        }
    }

    match state.mastery().overview(&child_id).await {
        Ok(overview) => println!(
            "mastered {}/{} ({:.0}% accuracy)",
            overview.mastered,
            overview.total_words,
            overview.accuracy * 100.0
        ),
        Err(err) => tracing::warn!(child_id, error = %err, "overview not loaded"),
    }
}
