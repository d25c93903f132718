use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::User;

/// Everything a command needs: the loaded config (including who is logged
/// in) and the store.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub repo: Arc<Repository>,
}

impl Context {
    /// Persist `name` as the logged-in user.
    pub fn set_current_user(&mut self, name: &str) -> Result<()> {
        self.config.set_user(name);
        self.config.save(&self.config_path)
    }
}

/// Resolve the logged-in user and hand it to `handler`. Fails with
/// [`AppError::Auth`] before `handler` runs if nobody is logged in.
pub async fn logged_in<'a, F, Fut>(ctx: &'a Context, handler: F) -> Result<()>
where
    F: FnOnce(&'a Context, User) -> Fut,
    Fut: Future<Output = Result<()>> + 'a,
{
    let name = ctx
        .config
        .current_user_name
        .as_deref()
        .ok_or_else(|| AppError::Auth("run `gator login <name>` first".to_string()))?;

    let user = ctx
        .repo
        .get_user_by_name(name)
        .await?
        .ok_or_else(|| AppError::Auth(format!("user {name} does not exist")))?;

    handler(ctx, user).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::Context;
    use crate::config::{Config, FetchConfig};
    use crate::db::test_support::{test_repo, TestRepo};

    pub struct TestContext {
        pub ctx: Context,
        _repo: TestRepo,
        _tmpdir: TempDir,
    }

    pub async fn test_context() -> TestContext {
        let repo = test_repo().await;
        let tmpdir = tempfile::tempdir().unwrap();
        let ctx = Context {
            config: Config {
                db_path: tmpdir.path().join("unused.db"),
                current_user_name: None,
                fetch: FetchConfig::default(),
            },
            config_path: tmpdir.path().join("config.toml"),
            repo: Arc::clone(&repo.repo),
        };
        TestContext {
            ctx,
            _repo: repo,
            _tmpdir: tmpdir,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::test_support::test_context;
    use super::*;

    #[tokio::test]
    async fn rejects_before_running_handler_when_logged_out() {
        let test = test_context().await;
        let called = AtomicBool::new(false);

        let err = logged_in(&test.ctx, |_, _| async {
            called.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Auth(_)), "got {err:?}");
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rejects_unknown_current_user() {
        let mut test = test_context().await;
        test.ctx.config.set_user("ghost");

        let err = logged_in(&test.ctx, |_, _| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn passes_resolved_user_to_handler() {
        let mut test = test_context().await;
        let alice = test.ctx.repo.create_user("alice").await.unwrap();
        test.ctx.set_current_user("alice").unwrap();

        logged_in(&test.ctx, |_, user| async move {
            assert_eq!(user, alice);
            Ok(())
        })
        .await
        .unwrap();

        let saved = Config::load(&test.ctx.config_path).unwrap();
        assert_eq!(saved.current_user_name.as_deref(), Some("alice"));
    }
}
