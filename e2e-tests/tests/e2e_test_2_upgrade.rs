// E2E Test 2: Upgrade
// A student who hit the free limits pays and gets unlimited access

mod e2e;

use e2e::api_client::ApiTestClient;
use e2e::helpers::{generate_test_user, TestEnv, TestResult};
use std::time::Instant;

#[tokio::test]
async fn test_e2e_2_upgrade() {
    let start = Instant::now();
    let test_name = "E2E Test 2: Upgrade".to_string();

    println!("\n🚀 Starting: {}", test_name);
    println!("{}", "=".repeat(80));

    println!("\n📋 Step 1: Starting service...");
    let env = match TestEnv::start().await {
        Ok(env) => env,
        Err(e) => {
            TestResult::failure(test_name, e, start.elapsed()).print();
            panic!("Service not available");
        }
    };
    let api = ApiTestClient::new(&env.base_url);
    let user = generate_test_user("upgrade");

    // Step 2: Exhaust the chapter quota
    println!("\n📋 Step 2: Using up free chapters...");
    for n in 1..=5 {
        api.chapter(&user, "chemistry", &format!("ch-{}", n)).await.unwrap();
    }
    let decision = api.chapter(&user, "chemistry", "ch-6").await.unwrap();
    assert_eq!(decision["allowed"], false);
    println!("✅ Free chapters exhausted");

    // Step 3: Pay for a quarterly plan
    println!("\n📋 Step 3: Buying the quarterly plan...");
    let verified = api.subscribe(&user, "quarterly", 129.0).await.unwrap();
    assert_eq!(verified["verified"], true);
    let subscription_id = verified["subscription_id"].as_str().unwrap().to_string();
    println!("✅ Subscription {} active", subscription_id);

    let status = api.subscription_status(&user).await.unwrap();
    assert_eq!(status["has_active_subscription"], true);
    assert_eq!(status["subscription"]["plan_id"], "quarterly");

    // Step 4: Everything is allowed
    println!("\n📋 Step 4: Accessing premium content...");
    let decision = api.chapter(&user, "chemistry", "ch-6").await.unwrap();
    assert_eq!(decision["reason"], "premium_subscriber");
    for _ in 0..30 {
        let decision = api.check(&user, "ai_query", None, None).await.unwrap();
        assert_eq!(decision["allowed"], true);
    }
    println!("✅ Premium access confirmed");

    // Step 5: Premium use does not count against free quotas
    println!("\n📋 Step 5: Checking usage was not tracked...");
    let usage = api.usage(&user).await.unwrap();
    assert_eq!(usage["premium"], true);
    let ai = usage["quotas"]
        .as_array()
        .unwrap()
        .iter()
        .find(|q| q["content_type"] == "ai_query")
        .unwrap();
    assert_eq!(ai["used"], 0);
    println!("✅ Premium use untracked");

    TestResult::success(test_name, start.elapsed()).print();
}
