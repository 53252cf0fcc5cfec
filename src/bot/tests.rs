//! Command-level tests against an in-memory database and a fake messenger.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use teloxide::types::{ChatId, UserId};

use super::*;
use crate::config::{ForceChannel, LookupEndpoint};
use crate::lookup::LookupError;

const OWNER: u64 = 1;
const ADMIN: u64 = 2;
const GROUP: i64 = -100123;
const AUDIT: i64 = -100999;

pub(crate) fn test_config() -> Config {
    Config {
        telegram_bot_token: "1:test".into(),
        owner_id: UserId(OWNER),
        admin_ids: HashSet::from([UserId(ADMIN)]),
        default_credits: 5,
        referral_credit: 3,
        force_channels: Vec::new(),
        lookups: BTreeMap::from([(
            "num".to_string(),
            LookupEndpoint {
                name: "num".into(),
                url: "https://api.example.com/num?q=".into(),
                description: "Phone number".into(),
                log_channel: Some(ChatId(AUDIT)),
                scrub: true,
            },
        )]),
        blocklist: vec!["Dm to buy access".into()],
        drop_emptied: true,
        branding: Some("🤖 @lookup_bot".into()),
        buy_contact: Some("@seller".into()),
        private_redirect: None,
        http_timeout_secs: 1,
        fetch_attempts: 1,
        retry_base_delay_ms: 0,
        refund_failed_lookups: true,
        broadcast_delay_ms: 0,
        free_credits_on_join: true,
        premium_for_all: false,
        log_chat_id: None,
        data_dir: PathBuf::from("."),
        database_path: PathBuf::from(":memory:"),
    }
}

fn state_with(config: Config) -> Arc<BotState> {
    let db = Database::open_in_memory().unwrap();
    let state = BotState::new(config, db, "lookup_bot".into()).unwrap();
    state.seed_settings().unwrap();
    Arc::new(state)
}

fn test_state() -> Arc<BotState> {
    state_with(test_config())
}

fn in_group(id: u64) -> Caller {
    Caller {
        user_id: UserId(id),
        username: None,
        first_name: format!("User{id}"),
        chat_id: ChatId(GROUP),
        private: false,
    }
}

fn in_private(id: u64) -> Caller {
    Caller {
        chat_id: ChatId(id as i64),
        private: true,
        ..in_group(id)
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeMessenger {
    sent: Arc<Mutex<Vec<(ChatId, String)>>>,
    members: Arc<Mutex<HashSet<(i64, u64)>>>,
    unreachable: Arc<Mutex<HashSet<i64>>>,
}

impl FakeMessenger {
    fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| chat.0 == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn join(&self, channel: i64, user: u64) {
        self.members.lock().unwrap().insert((channel, user));
    }

    fn block(&self, chat_id: i64) {
        self.unreachable.lock().unwrap().insert(chat_id);
    }
}

impl Messenger for FakeMessenger {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), String> {
        if self.unreachable.lock().unwrap().contains(&chat_id.0) {
            return Err("bot was blocked by the user".into());
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_reply(&self, chat_id: ChatId, reply: Reply) -> Result<(), String> {
        self.send_text(chat_id, &reply.text).await
    }

    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, String> {
        Ok(self.members.lock().unwrap().contains(&(chat_id.0, user_id.0)))
    }
}

async fn send(state: &Arc<BotState>, messenger: &FakeMessenger, caller: &Caller, text: &str) -> Option<Reply> {
    handle_message(state, messenger, caller, text, Utc::now()).await
}

async fn reply_text(state: &Arc<BotState>, messenger: &FakeMessenger, caller: &Caller, text: &str) -> String {
    send(state, messenger, caller, text)
        .await
        .unwrap_or_else(|| panic!("no reply to {text}"))
        .text
}

fn credits(state: &BotState, id: u64) -> i64 {
    state.db.require_user(id as i64).unwrap().credits
}

/// The code shown in a "Code created" reply.
fn created_code(reply: &str) -> String {
    let start = reply.find("Code: <code>").unwrap() + "Code: <code>".len();
    let end = reply[start..].find("</code>").unwrap();
    reply[start..start + end].to_string()
}

// =============================================================================
// ONBOARDING
// =============================================================================

mod onboarding {
    use super::*;

    #[tokio::test]
    async fn test_start_grants_default_credits_once() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let user = in_private(10);

        let reply = reply_text(&state, &messenger, &user, "/start").await;
        assert!(reply.contains("Credits: <b>5</b>"), "{reply}");
        assert_eq!(credits(&state, 10), 5);

        send(&state, &messenger, &user, "/start").await;
        assert_eq!(credits(&state, 10), 5);
    }

    #[tokio::test]
    async fn test_no_bonus_when_free_credits_off() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        let reply = reply_text(&state, &messenger, &in_private(OWNER), "/freecredits off").await;
        assert!(reply.contains("off"));

        send(&state, &messenger, &in_private(10), "/start").await;
        assert_eq!(credits(&state, 10), 0);
    }

    #[tokio::test]
    async fn test_referral_credits_referrer_once() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        send(&state, &messenger, &in_private(10), "/start").await;
        send(&state, &messenger, &in_private(11), "/start ref_10").await;

        let referrer = state.db.require_user(10).unwrap();
        assert_eq!(referrer.credits, 5 + 3);
        assert_eq!(referrer.referrals, 1);
        assert_eq!(messenger.sent_to(10).len(), 1);

        // Only the /start that creates the user counts
        send(&state, &messenger, &in_private(11), "/start ref_10").await;
        assert_eq!(state.db.require_user(10).unwrap().referrals, 1);
    }

    #[tokio::test]
    async fn test_self_and_unknown_referrals_ignored() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        send(&state, &messenger, &in_private(12), "/start ref_12").await;
        send(&state, &messenger, &in_private(13), "/start ref_999").await;

        assert_eq!(state.db.require_user(12).unwrap().referrals, 0);
        assert_eq!(state.db.referral_count(999).unwrap(), 0);
        assert!(messenger.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_commands_are_ignored() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let user = in_group(10);

        assert!(send(&state, &messenger, &user, "hello").await.is_none());
        assert!(send(&state, &messenger, &user, "/nosuchcommand").await.is_none());
        assert!(send(&state, &messenger, &user, "/start@other_bot").await.is_none());
        assert!(send(&state, &messenger, &user, "/start@lookup_bot").await.is_some());
    }
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

mod authorization {
    use super::*;

    #[tokio::test]
    async fn test_unauthorized_commands_are_silent() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        assert!(send(&state, &messenger, &in_group(10), "/stats").await.is_none());
        assert!(send(&state, &messenger, &in_group(10), "/gencode 10 3").await.is_none());
        assert!(send(&state, &messenger, &in_group(ADMIN), "/addadmin 10").await.is_none());
        assert!(send(&state, &messenger, &in_group(ADMIN), "/stats").await.is_some());
    }

    #[tokio::test]
    async fn test_added_admin_can_moderate() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        reply_text(&state, &messenger, &in_private(OWNER), "/addadmin 20").await;
        assert!(send(&state, &messenger, &in_group(20), "/stats").await.is_some());

        reply_text(&state, &messenger, &in_private(OWNER), "/removeadmin 20").await;
        assert!(send(&state, &messenger, &in_group(20), "/stats").await.is_none());
    }

    #[tokio::test]
    async fn test_owner_cannot_be_banned_or_removed() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), &format!("/ban {OWNER}")).await;
        assert!(reply.contains("cannot be banned"));
        let reply = reply_text(&state, &messenger, &in_group(OWNER), &format!("/removeadmin {OWNER}")).await;
        assert!(reply.contains("cannot be removed"));
    }

    #[tokio::test]
    async fn test_banned_user_is_rejected() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        send(&state, &messenger, &in_group(10), "/start").await;
        reply_text(&state, &messenger, &in_group(ADMIN), "/ban 10").await;

        let reply = reply_text(&state, &messenger, &in_group(10), "/myprofile").await;
        assert!(reply.contains("banned"));

        reply_text(&state, &messenger, &in_group(ADMIN), "/unban 10").await;
        let reply = reply_text(&state, &messenger, &in_group(10), "/myprofile").await;
        assert!(reply.contains("Your profile"));
    }

    #[tokio::test]
    async fn test_bad_arguments_show_usage() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/gift abc 5").await;
        assert_eq!(reply, "❌ Use: /gift &lt;user_id&gt; &lt;amount&gt;");
        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/gencode 10 3 7w").await;
        assert!(reply.starts_with("❌ Use: /gencode"));
        assert!(state.db.list_codes(crate::store::CodeFilter::All).unwrap().is_empty());
    }
}

// =============================================================================
// ECONOMY
// =============================================================================

mod economy {
    use super::*;

    #[tokio::test]
    async fn test_gencode_max_uses() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/gencode 10 3").await;
        let code = created_code(&reply);
        assert_eq!(code.len(), 8);

        for id in 10..13 {
            let reply = reply_text(&state, &messenger, &in_group(id), &format!("/redeem {code}")).await;
            assert!(reply.contains("Code redeemed"), "{reply}");
            assert_eq!(credits(&state, id), 5 + 10);
        }

        let reply = reply_text(&state, &messenger, &in_group(13), &format!("/redeem {code}")).await;
        assert!(reply.contains("max uses reached"), "{reply}");
        assert_eq!(credits(&state, 13), 5);
        assert_eq!(state.db.get_code(&code).unwrap().unwrap().uses, 3);
    }

    #[tokio::test]
    async fn test_redeem_twice() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        reply_text(&state, &messenger, &in_group(ADMIN), "/customcode promo 4 10 1d").await;
        let first = reply_text(&state, &messenger, &in_group(10), "/redeem PROMO").await;
        assert!(first.contains("+4 credits"));
        let second = reply_text(&state, &messenger, &in_group(10), "/redeem promo").await;
        assert!(second.contains("already redeemed"));
        assert_eq!(credits(&state, 10), 5 + 4);
    }

    #[tokio::test]
    async fn test_deactivated_code() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        reply_text(&state, &messenger, &in_group(ADMIN), "/customcode OLD 4 10").await;
        reply_text(&state, &messenger, &in_group(ADMIN), "/deactivatecode old").await;
        let reply = reply_text(&state, &messenger, &in_group(10), "/redeem OLD").await;
        assert!(reply.contains("no longer active"));

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/deactivatecode NOPE").await;
        assert!(reply.contains("not found"));
    }

    #[tokio::test]
    async fn test_gift_and_remove_credits() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(10), "/start").await;

        reply_text(&state, &messenger, &in_group(ADMIN), "/gift 10 20").await;
        assert_eq!(credits(&state, 10), 25);
        assert_eq!(messenger.sent_to(10).len(), 1);

        reply_text(&state, &messenger, &in_group(ADMIN), "/removecredits 10 100").await;
        assert_eq!(credits(&state, 10), 0);

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/gift 404 1").await;
        assert!(reply.contains("not found"));
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(50), "/start").await;

        let reply = reply_text(&state, &messenger, &in_group(OWNER), &format!("/gift 50 {}", i64::MAX)).await;
        assert!(reply.starts_with("❌ Use: /gift"), "{reply}");
        let reply = reply_text(&state, &messenger, &in_group(OWNER), "/bulkgift 1000001 50").await;
        assert!(reply.starts_with("❌ Use: /bulkgift"), "{reply}");
        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/gencode 1000001 3").await;
        assert!(reply.starts_with("❌ Use: /gencode"), "{reply}");

        assert_eq!(credits(&state, 50), 5);
        let reply = reply_text(&state, &messenger, &in_group(50), "/myprofile").await;
        assert!(reply.contains("Your profile"), "{reply}");
    }

    #[tokio::test]
    async fn test_bulk_gift_reports_missing() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(10), "/start").await;
        send(&state, &messenger, &in_group(11), "/start").await;

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/bulkgift 2 10 11 404").await;
        assert!(reply.contains("2 user(s)"));
        assert!(reply.contains("404"));
        assert_eq!(credits(&state, 11), 7);
    }

    #[tokio::test]
    async fn test_premium_for_all_grants_everyone() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(10), "/start").await;

        reply_text(&state, &messenger, &in_group(OWNER), "/premiumforallusers").await;
        assert!(state.db.setting(Setting::PremiumForAll).unwrap());
        assert_eq!(credits(&state, 10), 10);

        reply_text(&state, &messenger, &in_group(OWNER), "/freemiumforallusers").await;
        assert!(!state.db.setting(Setting::PremiumForAll).unwrap());
    }
}

// =============================================================================
// USER LISTS
// =============================================================================

mod user_lists {
    use super::*;

    #[tokio::test]
    async fn test_huge_list_arguments_are_clamped() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(10), "/start").await;
        let admin = in_group(ADMIN);

        let reply = reply_text(&state, &messenger, &admin, "/recentusers 1000000000").await;
        assert!(reply.contains("last 3650 day(s)</b> (2)"), "{reply}");

        let reply = reply_text(&state, &messenger, &admin, &format!("/inactiveusers {}", usize::MAX)).await;
        assert!(reply.contains("Inactive for 3650+ day(s)</b> (0)"), "{reply}");

        let reply = reply_text(&state, &messenger, &admin, &format!("/users {}", usize::MAX)).await;
        assert!(reply.contains("page 1/1, 2 total"), "{reply}");
    }

    #[tokio::test]
    async fn test_search_wildcards_are_literal() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(10), "/start").await;

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/searchuser _").await;
        assert!(reply.contains("Nobody yet."), "{reply}");
    }
}

// =============================================================================
// LOOKUPS
// =============================================================================

mod lookups {
    use super::*;
    use crate::bot::lookup::{Presentation, finish};

    fn context<'a>(state: &'a Arc<BotState>, messenger: &'a FakeMessenger, caller: &'a Caller) -> Context<'a, FakeMessenger> {
        let (user, _) = onboard(state, caller, Utc::now()).unwrap();
        Context {
            state,
            messenger,
            caller,
            role: Role::resolve(&state.config, caller.user_id, user.is_admin),
            user,
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_private_lookup_is_redirected() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        let reply = reply_text(&state, &messenger, &in_private(10), "/num 9876543210").await;
        assert!(reply.contains("group"));
        assert_eq!(credits(&state, 10), 5);
        assert_eq!(state.db.lookup_totals().unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_private_chat_rule_covers_user_commands() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let user = in_private(10);
        reply_text(&state, &messenger, &in_group(ADMIN), "/customcode PROMO 4 10").await;

        for command in ["/redeem PROMO", "/myprofile", "/refer", "/buy"] {
            let reply = reply_text(&state, &messenger, &user, command).await;
            assert!(reply.contains("group chats"), "{command}: {reply}");
        }
        assert_eq!(credits(&state, 10), 5);
        assert_eq!(state.db.get_code("PROMO").unwrap().unwrap().uses, 0);

        assert!(reply_text(&state, &messenger, &user, "/start").await.contains("Credits"));
        assert!(!reply_text(&state, &messenger, &user, "/help").await.contains("group chats"));

        reply_text(&state, &messenger, &in_group(OWNER), "/premiumforallusers").await;
        let reply = reply_text(&state, &messenger, &user, "/redeem PROMO").await;
        assert!(reply.contains("Code redeemed"), "{reply}");
    }

    #[tokio::test]
    async fn test_missing_input_costs_nothing() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        let reply = reply_text(&state, &messenger, &in_group(10), "/num").await;
        assert!(reply.starts_with("❌ Use: /num"));
        assert_eq!(credits(&state, 10), 5);
    }

    #[tokio::test]
    async fn test_zero_credits_rejected() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        reply_text(&state, &messenger, &in_group(OWNER), "/freecredits off").await;

        let reply = reply_text(&state, &messenger, &in_group(10), "/num 9876543210").await;
        assert!(reply.contains("Not enough credits"));
        assert_eq!(credits(&state, 10), 0);
    }

    #[tokio::test]
    async fn test_successful_result_is_scrubbed_logged_and_audited() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let caller = in_group(10);
        let ctx = context(&state, &messenger, &caller);
        let endpoint = state.config.lookup("num").unwrap();
        assert!(state.db.deduct_credit(10).unwrap());

        let body = json!({"name": "A", "note": "Dm to buy access now", "ad": "Dm to buy access"});
        let reply = finish(&ctx, endpoint, "9876543210", Ok(body), Presentation::Full).await.unwrap();

        let text = reply.text.replace("&quot;", "\"");
        assert!(text.contains(r#""note": "now""#), "{text}");
        assert!(!text.contains("Dm to buy access"));
        assert!(!text.contains(r#""ad""#));
        assert!(reply.text.contains("🤖 @lookup_bot"));
        assert!(reply.text.contains("Credits left: 4"));
        assert!(reply.keyboard.is_some());

        assert_eq!(state.db.lookup_totals().unwrap(), (1, 1));
        assert_eq!(state.db.require_user(10).unwrap().total_lookups, 1);
        assert_eq!(messenger.sent_to(AUDIT).len(), 1);
    }

    #[tokio::test]
    async fn test_plain_presentation() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let caller = in_group(10);
        let ctx = context(&state, &messenger, &caller);
        let endpoint = state.config.lookup("num").unwrap();

        let reply = finish(&ctx, endpoint, "1", Ok(json!({"a": 1})), Presentation::Plain).await.unwrap();
        assert!(reply.text.starts_with("<pre>"));
        assert!(reply.keyboard.is_none());
    }

    #[tokio::test]
    async fn test_failed_lookup_is_refunded() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let caller = in_group(10);
        let ctx = context(&state, &messenger, &caller);
        let endpoint = state.config.lookup("num").unwrap();
        assert!(state.db.deduct_credit(10).unwrap());

        let reply = finish(&ctx, endpoint, "123", Err(LookupError::Status(503)), Presentation::Full)
            .await
            .unwrap();
        assert!(reply.text.contains("No data found"));
        assert!(reply.text.contains("refunded"));
        assert_eq!(credits(&state, 10), 5);
        assert_eq!(state.db.lookup_totals().unwrap(), (1, 0));
        assert!(messenger.sent_to(AUDIT).is_empty());
    }

    #[tokio::test]
    async fn test_log_write_failure_keeps_refund_and_result() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let caller = in_group(10);
        let ctx = context(&state, &messenger, &caller);
        let endpoint = state.config.lookup("num").unwrap();
        state.db.execute_batch("DROP TABLE lookups").unwrap();

        assert!(state.db.deduct_credit(10).unwrap());
        let reply = finish(&ctx, endpoint, "123", Err(LookupError::Status(503)), Presentation::Full)
            .await
            .unwrap();
        assert!(reply.text.contains("refunded"));
        assert_eq!(credits(&state, 10), 5);

        assert!(state.db.deduct_credit(10).unwrap());
        let reply = finish(&ctx, endpoint, "123", Ok(json!({"a": 1})), Presentation::Full).await.unwrap();
        assert!(reply.text.contains("Credits left: 4"), "{}", reply.text);
    }

    #[tokio::test]
    async fn test_force_join_and_check_again() {
        let mut config = test_config();
        config.force_channels = vec![ForceChannel {
            id: ChatId(-100500),
            link: "https://t.me/example".parse().unwrap(),
        }];
        let state = state_with(config);
        let messenger = FakeMessenger::default();
        let caller = in_group(10);

        let reply = send(&state, &messenger, &caller, "/num 123").await.unwrap();
        assert!(reply.text.contains("join"));
        assert!(reply.keyboard.is_some());
        assert_eq!(credits(&state, 10), 5);

        let reply = callbacks::handle_callback(&state, &messenger, &caller, "check", Utc::now()).await.unwrap();
        assert!(reply.keyboard.is_some());

        messenger.join(-100500, 10);
        let reply = callbacks::handle_callback(&state, &messenger, &caller, "check", Utc::now()).await.unwrap();
        assert!(reply.text.contains("Thanks for joining"));

        // Staff skip the gate
        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/myprofile").await;
        assert!(reply.contains("Your profile"));
    }

    #[tokio::test]
    async fn test_unknown_callback_data_is_ignored() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        let reply = callbacks::handle_callback(&state, &messenger, &in_group(10), "zzz", Utc::now()).await;
        assert!(reply.is_none());
    }
}

// =============================================================================
// BROADCAST AND BACKUPS
// =============================================================================

mod broadcasting {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_deliver_counts_failures() {
        let messenger = FakeMessenger::default();
        messenger.block(11);

        let report = broadcast::deliver(&messenger, &[10, 11, 12], "hi", Duration::ZERO).await;
        assert_eq!(report, broadcast::BroadcastReport { delivered: 2, failed: 1 });
        assert_eq!(messenger.sent_to(12), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_spawned_broadcast_skips_banned_and_reports() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        for id in [10, 11, 12] {
            send(&state, &messenger, &in_group(id), "/start").await;
        }
        state.db.set_banned(12, true, Utc::now()).unwrap();

        let admin = in_private(ADMIN);
        let recipients = state.db.broadcast_recipients().unwrap();
        broadcast::spawn(state.clone(), messenger.clone(), admin, recipients, "news".into())
            .await
            .unwrap();

        assert_eq!(messenger.sent_to(10), vec!["news".to_string()]);
        assert!(messenger.sent_to(12).is_empty());
        assert_eq!(state.db.broadcast_count().unwrap(), 1);
        assert!(messenger.sent_to(ADMIN as i64)[0].contains("Delivered"));
    }

    #[tokio::test]
    async fn test_broadcast_command_requires_text() {
        let state = test_state();
        let messenger = FakeMessenger::default();

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/broadcast").await;
        assert!(reply.starts_with("❌ Use: /broadcast"));
        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/broadcast hello all").await;
        assert!(reply.contains("Broadcasting"));
    }

    #[tokio::test]
    async fn test_dm_delivery() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        messenger.block(11);

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/dm 10 see you\nsoon").await;
        assert!(reply.contains("sent"));
        assert!(messenger.sent_to(10)[0].ends_with("see you\nsoon"));

        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/dm 11 hi").await;
        assert!(reply.contains("Could not deliver"));
    }

    #[tokio::test]
    async fn test_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.data_dir = dir.path().to_path_buf();
        let state = state_with(config);
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(10), "/start").await;

        let csv = send(&state, &messenger, &in_group(ADMIN), "/backup").await.unwrap();
        let document = csv.document.unwrap();
        assert!(document.file_name.ends_with(".csv"));
        assert!(String::from_utf8(document.bytes).unwrap().contains("10,,User10,5"));

        let full = send(&state, &messenger, &in_group(OWNER), "/fulldbbackup").await.unwrap();
        let document = full.document.unwrap();
        assert!(document.file_name.ends_with(".zip"));
        assert!(document.bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn test_delete_user() {
        let state = test_state();
        let messenger = FakeMessenger::default();
        send(&state, &messenger, &in_group(10), "/start").await;

        reply_text(&state, &messenger, &in_group(ADMIN), "/deleteuser 10").await;
        assert!(state.db.get_user(10).unwrap().is_none());
        let reply = reply_text(&state, &messenger, &in_group(ADMIN), "/deleteuser 10").await;
        assert!(reply.contains("not found"));
    }
}
