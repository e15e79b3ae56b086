//! Read-only metadata pages, in whichever mode the instance runs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

use crate::acl::{self, Intent};
use crate::auth::Viewer;
use crate::config::OperationMode;
use crate::error::Error;
use crate::repo::{parse_repo_path, resolve_on_disk, scan};
use crate::server::AppState;
use crate::server::dto::{NamespaceView, RepositoryView};
use crate::server::response::{ApiError, ApiResponse};
use crate::simple::Visibility;
use crate::types::full_name;

/// Most repositories listed on a namespace page.
const NAMESPACE_PAGE_SIZE: u32 = 200;

fn visibility_str(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "public",
        Visibility::Private => "private",
    }
}

pub async fn get_namespace(
    viewer: Viewer,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let config = &state.config;
    let user = viewer.username();

    if !config.use_namespace || config.is_namespace_ignored(&name) {
        return Err(Error::NotFound("namespace").into());
    }

    let view = match config.mode {
        OperationMode::Normal => {
            let store = state.store()?;
            let namespace = store.get_namespace(&name)?;
            acl::check_namespace(user, &namespace)?;

            let repositories = store
                .list_repositories(&name, 0, NAMESPACE_PAGE_SIZE)?
                .into_iter()
                .filter(|r| acl::check(user, r, Some(&namespace), Intent::Pull).is_ok())
                .map(|r| r.name)
                .collect();

            NamespaceView {
                name: namespace.name,
                title: namespace.title,
                description: namespace.description,
                owner: Some(namespace.owner),
                status: Some(namespace.status.to_string()),
                repositories,
            }
        }
        OperationMode::Simple => {
            let snapshot = state.simple.snapshot();
            let namespace = snapshot.namespace(&name).ok_or(Error::NotFound("namespace"))?;

            let repositories = namespace
                .repositories
                .values()
                .filter(|r| {
                    acl::check_simple(user, &r.config, Some(&namespace.config), Intent::Pull).is_ok()
                })
                .map(|r| r.name.clone())
                .collect();

            NamespaceView {
                name: namespace.name.clone(),
                title: namespace.name.clone(),
                description: namespace.config.repo.description.clone(),
                owner: None,
                status: None,
                repositories,
            }
        }
        OperationMode::Plain => {
            let mut namespaces = scan(config)?;
            let namespace = namespaces.remove(&name).ok_or(Error::NotFound("namespace"))?;

            NamespaceView {
                repositories: namespace.repositories.into_keys().collect(),
                name: namespace.name,
                title: namespace.title,
                description: namespace.description,
                owner: None,
                status: None,
            }
        }
    };

    Ok(ApiResponse::success(view))
}

pub async fn get_repository(
    viewer: Viewer,
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let config = &state.config;
    let user = viewer.username();
    let path = parse_repo_path(&format!("{namespace}/{name}"), config)?;
    let repo_full_name = full_name(&path.namespace, &path.name);

    let view = match config.mode {
        OperationMode::Normal => {
            let store = state.store()?;
            let namespace = if config.use_namespace {
                Some(store.get_namespace(&path.namespace)?)
            } else {
                None
            };
            let record = store.get_repository(&path.namespace, &path.name)?;
            acl::check(user, &record, namespace.as_ref(), Intent::Pull)?;

            RepositoryView {
                clone_url: config.clone_address(&repo_full_name),
                full_name: repo_full_name,
                namespace: record.namespace,
                name: record.name,
                description: record.description,
                owner: Some(record.owner),
                status: Some(record.status.to_string()),
            }
        }
        OperationMode::Simple => {
            let snapshot = state.simple.snapshot();
            let repo = snapshot
                .repository(&path.namespace, &path.name)
                .ok_or(Error::NotFound("repository"))?;
            let namespace_config = snapshot.namespace(&path.namespace).map(|ns| &ns.config);
            acl::check_simple(user, &repo.config, namespace_config, Intent::Pull)?;

            RepositoryView {
                clone_url: config.clone_address(&repo_full_name),
                full_name: repo_full_name,
                namespace: repo.namespace.clone(),
                name: repo.name.clone(),
                description: repo.config.repo.description.clone(),
                owner: None,
                status: Some(visibility_str(repo.config.repo.visibility).to_string()),
            }
        }
        OperationMode::Plain => {
            let record = resolve_on_disk(config, &path)?;

            RepositoryView {
                clone_url: None,
                full_name: repo_full_name,
                namespace: record.namespace,
                name: record.name,
                description: record.description,
                owner: None,
                status: None,
            }
        }
    };

    Ok(ApiResponse::success(view))
}
