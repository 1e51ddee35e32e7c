//! Plugin registry and hook bus tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use trove_types::{PluginError, Token};

use super::helpers::{stream, test_env, text_file, token_of};
use crate::error::BackendError;
use crate::plugin::{HookType, Plugin, PluginSetting};

/// Records every hook it sees; optionally vetoes pre hooks or fails post
/// hooks.
#[derive(Default)]
struct TestPlugin {
    hooks: Mutex<Vec<(HookType, String)>>,
    veto_pre: AtomicBool,
    fail_post: AtomicBool,
    setups: AtomicU32,
}

impl TestPlugin {
    fn hooks_seen(&self) -> Vec<HookType> {
        self.hooks
            .lock()
            .unwrap()
            .iter()
            .map(|(hook, _)| *hook)
            .collect()
    }
}

fn is_pre(hook: HookType) -> bool {
    matches!(
        hook,
        HookType::NewRecordPre
            | HookType::EditRecordPre
            | HookType::EditMetadataPre
            | HookType::SetRecordStatusPre
            | HookType::PluginPre
    )
}

#[async_trait::async_trait]
impl Plugin for TestPlugin {
    fn id(&self) -> &str {
        "test"
    }

    fn settings(&self) -> Vec<PluginSetting> {
        vec![PluginSetting {
            key: "mode".to_string(),
            value: "test".to_string(),
        }]
    }

    async fn setup(&self) -> Result<(), BackendError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(
        &self,
        _token: Option<Token>,
        cmd: &str,
        _payload: &str,
    ) -> Result<String, BackendError> {
        Ok(format!("read:{cmd}"))
    }

    async fn write(&self, _token: Token, cmd: &str, payload: &str) -> Result<String, BackendError> {
        Ok(format!("wrote:{cmd}:{payload}"))
    }

    async fn hook(&self, hook: HookType, payload: &str) -> Result<(), BackendError> {
        self.hooks
            .lock()
            .unwrap()
            .push((hook, payload.to_string()));

        if is_pre(hook) && self.veto_pre.load(Ordering::SeqCst) {
            return Err(PluginError {
                plugin_id: "test".to_string(),
                code: 1,
                context: "vetoed".to_string(),
            }
            .into());
        }
        if !is_pre(hook) && self.fail_post.load(Ordering::SeqCst) {
            return Err(PluginError {
                plugin_id: "test".to_string(),
                code: 2,
                context: "post failed".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn fsck(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

async fn env_with_plugin() -> (super::helpers::TestEnv, Arc<TestPlugin>) {
    let env = test_env().await;
    let plugin = Arc::new(TestPlugin::default());
    env.backend.plugin_register(plugin.clone()).unwrap();
    env.backend.plugin_setup("test").await.unwrap();
    (env, plugin)
}

#[tokio::test]
async fn test_register_and_setup_once() {
    let (env, plugin) = env_with_plugin().await;
    assert_eq!(plugin.setups.load(Ordering::SeqCst), 1);

    let inventory = env.backend.plugin_inventory();
    assert_eq!(inventory.len(), 1);
    assert_eq!(inventory[0].0, "test");
    assert_eq!(inventory[0].1[0].key, "mode");
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let (env, _plugin) = env_with_plugin().await;
    let err = env.backend.plugin_register(Arc::new(TestPlugin::default()));
    assert!(err.is_err());
}

#[tokio::test]
async fn test_record_new_fires_hook_pair() {
    let (env, plugin) = env_with_plugin().await;
    env.backend
        .record_new(vec![stream("usermd", 1, "{}\n")], vec![text_file("a.md", "x")])
        .await
        .unwrap();

    assert_eq!(
        plugin.hooks_seen(),
        vec![HookType::NewRecordPre, HookType::NewRecordPost]
    );
}

#[tokio::test]
async fn test_pre_hook_vetoes_mutation() {
    let (env, plugin) = env_with_plugin().await;
    plugin.veto_pre.store(true, Ordering::SeqCst);

    let err = env
        .backend
        .record_new(vec![stream("usermd", 1, "{}\n")], vec![text_file("a.md", "x")])
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Plugin(_)));

    // Nothing was created.
    assert!(env.tstore.inventory().is_empty());
    let inv = env.backend.inventory(None, None, 0, 1).await.unwrap();
    assert!(inv.unvetted.values().all(Vec::is_empty));
}

#[tokio::test]
async fn test_post_hook_failure_does_not_fail_mutation() {
    let (env, plugin) = env_with_plugin().await;
    plugin.fail_post.store(true, Ordering::SeqCst);

    let record = env
        .backend
        .record_new(vec![stream("usermd", 1, "{}\n")], vec![text_file("a.md", "x")])
        .await
        .unwrap();
    assert_eq!(record.metadata.iteration, 1);
}

#[tokio::test]
async fn test_edit_fires_edit_hooks() {
    let (env, plugin) = env_with_plugin().await;
    let record = env
        .backend
        .record_new(vec![stream("usermd", 1, "{}\n")], vec![text_file("a.md", "v1")])
        .await
        .unwrap();
    let token = token_of(&record);

    env.backend
        .record_edit(&token, vec![], vec![], vec![text_file("a.md", "v2")], vec![])
        .await
        .unwrap();
    env.backend
        .record_edit_metadata(&token, vec![stream("usermd", 1, "more\n")], vec![])
        .await
        .unwrap();

    let hooks = plugin.hooks_seen();
    assert!(hooks.contains(&HookType::EditRecordPre));
    assert!(hooks.contains(&HookType::EditRecordPost));
    assert!(hooks.contains(&HookType::EditMetadataPre));
    assert!(hooks.contains(&HookType::EditMetadataPost));
}

#[tokio::test]
async fn test_plugin_write_dispatches_with_hooks() {
    let (env, plugin) = env_with_plugin().await;
    let record = env
        .backend
        .record_new(vec![stream("usermd", 1, "{}\n")], vec![text_file("a.md", "x")])
        .await
        .unwrap();
    let token = token_of(&record);

    let reply = env
        .backend
        .plugin_write(&token, "test", "dothing", "{\"arg\":1}")
        .await
        .unwrap();
    assert_eq!(reply, "wrote:dothing:{\"arg\":1}");

    let hooks = plugin.hooks_seen();
    assert!(hooks.contains(&HookType::PluginPre));
    assert!(hooks.contains(&HookType::PluginPost));

    // The post hook payload carries the reply.
    let payloads = plugin.hooks.lock().unwrap();
    let (_, post_payload) = payloads
        .iter()
        .find(|(hook, _)| *hook == HookType::PluginPost)
        .unwrap();
    assert!(post_payload.contains("wrote:dothing"));
}

#[tokio::test]
async fn test_plugin_write_missing_record() {
    let (env, _plugin) = env_with_plugin().await;
    let token = Token::from([9u8; 32]);
    let err = env
        .backend
        .plugin_write(&token, "test", "cmd", "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::RecordNotFound));
}

#[tokio::test]
async fn test_plugin_read_token_optional() {
    let (env, _plugin) = env_with_plugin().await;

    // No token: fine.
    let reply = env
        .backend
        .plugin_read(None, "test", "summary", "{}")
        .await
        .unwrap();
    assert_eq!(reply, "read:summary");

    // A token that doesn't resolve: rejected.
    let err = env
        .backend
        .plugin_read(Some(Token::from([9u8; 32])), "test", "summary", "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::RecordNotFound));
}

#[tokio::test]
async fn test_unknown_plugin() {
    let env = test_env().await;
    let err = env
        .backend
        .plugin_read(None, "ghost", "cmd", "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::PluginNotFound(_)));
}
