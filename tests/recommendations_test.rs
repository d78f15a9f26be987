mod common;

use common::*;
use grocerly_api::services::orders::{OrderLineInput, PlaceOrderInput};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn order_input(user_id: Uuid, cart_items: Vec<OrderLineInput>) -> PlaceOrderInput {
    PlaceOrderInput {
        user_id,
        delivery_address: "9 Cedar Walk".to_string(),
        cart_items,
        coupon_id: None,
        coupon_discount: None,
    }
}

async fn place_and_deliver(app: &TestApp, user_id: Uuid, lines: Vec<OrderLineInput>) -> Uuid {
    let placed = app
        .state
        .services
        .orders
        .place_order(order_input(user_id, lines))
        .await
        .unwrap();
    deliver_order(app, placed.order_id).await;
    placed.order_id
}

#[tokio::test]
async fn trending_is_deterministic_across_calls() {
    let app = spawn_app().await;
    let a = seed_product(&app, "Bananas", dec!(1.00), 100).await;
    let b = seed_product(&app, "Yoghurt", dec!(2.00), 100).await;
    let c = seed_product(&app, "Granola", dec!(4.00), 100).await;

    // Twelve delivered order items clears the minimum-sample threshold.
    for _ in 0..4 {
        place_and_deliver(
            &app,
            Uuid::new_v4(),
            vec![line(a.id, 2), line(b.id, 1), line(c.id, 1)],
        )
        .await;
    }

    let first = app.state.services.recommendations.trending(10, 7).await.unwrap();
    let second = app.state.services.recommendations.trending(10, 7).await.unwrap();

    assert!(!first.is_empty());
    let first_ids: Vec<Uuid> = first.iter().map(|s| s.product.id).collect();
    let second_ids: Vec<Uuid> = second.iter().map(|s| s.product.id).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn trending_favors_larger_recent_volume() {
    let app = spawn_app().await;
    let hot = seed_product(&app, "Strawberries", dec!(3.00), 200).await;
    let mild = seed_product(&app, "Celery", dec!(1.00), 200).await;

    // Both appear in every order so the sample threshold is met; the hot
    // product moves in larger quantities.
    for _ in 0..6 {
        place_and_deliver(&app, Uuid::new_v4(), vec![line(hot.id, 5), line(mild.id, 1)]).await;
    }

    let results = app.state.services.recommendations.trending(10, 7).await.unwrap();
    assert_eq!(results[0].product.id, hot.id);
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn thin_history_falls_back_to_newest_active() {
    let app = spawn_app().await;
    let older = seed_product(&app, "Flour", dec!(2.00), 10).await;
    let newer = seed_product(&app, "Yeast", dec!(1.00), 10).await;

    // One delivered item is far below the sample minimum.
    place_and_deliver(&app, Uuid::new_v4(), vec![line(older.id, 1)]).await;

    let results = app.state.services.recommendations.trending(10, 7).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|s| s.score == 0.0));
    // Newest first in the fallback ordering.
    assert_eq!(results[0].product.id, newer.id);
}

#[tokio::test]
async fn trending_results_are_cached_within_ttl() {
    let app = spawn_app().await;
    let a = seed_product(&app, "Lemons", dec!(0.50), 100).await;
    let b = seed_product(&app, "Limes", dec!(0.60), 100).await;

    for _ in 0..6 {
        place_and_deliver(&app, Uuid::new_v4(), vec![line(a.id, 1), line(b.id, 1)]).await;
    }

    let before = app.state.services.recommendations.trending(10, 7).await.unwrap();

    // New activity inside the TTL does not change the served ranking.
    for _ in 0..6 {
        place_and_deliver(&app, Uuid::new_v4(), vec![line(b.id, 5)]).await;
    }
    let after = app.state.services.recommendations.trending(10, 7).await.unwrap();

    let before_ids: Vec<Uuid> = before.iter().map(|s| s.product.id).collect();
    let after_ids: Vec<Uuid> = after.iter().map(|s| s.product.id).collect();
    assert_eq!(before_ids, after_ids);
}

#[tokio::test]
async fn frequently_bought_together_uses_co_purchase_history() {
    let app = spawn_app().await;
    let pasta = seed_product(&app, "Spaghetti", dec!(1.50), 100).await;
    let sauce = seed_product(&app, "Passata", dec!(2.00), 100).await;
    let cheese = seed_product(&app, "Parmesan", dec!(5.00), 100).await;

    // Sauce pairs with pasta three times, cheese once.
    for _ in 0..3 {
        place_and_deliver(
            &app,
            Uuid::new_v4(),
            vec![line(pasta.id, 1), line(sauce.id, 1)],
        )
        .await;
    }
    place_and_deliver(
        &app,
        Uuid::new_v4(),
        vec![line(pasta.id, 1), line(cheese.id, 1)],
    )
    .await;

    let results = app
        .state
        .services
        .recommendations
        .frequently_bought_together(pasta.id, 5, &[])
        .await
        .unwrap();

    assert_eq!(results[0].id, sauce.id, "strongest pair ranks first");
    assert!(!results.iter().any(|p| p.id == pasta.id), "anchor excluded");
}

#[tokio::test]
async fn frequently_bought_together_falls_back_to_category() {
    let app = spawn_app().await;
    let dairy = Some(Uuid::new_v4());
    let milk = seed_product_in_category(&app, "Milk", dec!(2.00), 10, dairy).await;
    let cream = seed_product_in_category(&app, "Cream", dec!(2.50), 10, dairy).await;
    let butter = seed_product_in_category(&app, "Butter", dec!(3.00), 10, dairy).await;
    let _unrelated = seed_product(&app, "Batteries", dec!(4.00), 10).await;

    // No co-purchase history at all for milk.
    let results = app
        .state
        .services
        .recommendations
        .frequently_bought_together(milk.id, 5, &[])
        .await
        .unwrap();

    assert!(results.len() >= 2);
    let ids: Vec<Uuid> = results.iter().map(|p| p.id).collect();
    assert!(ids.contains(&cream.id));
    assert!(ids.contains(&butter.id));
    assert!(!ids.contains(&milk.id));
}

#[tokio::test]
async fn recently_delivered_products_are_excluded_from_personalized() {
    let app = spawn_app().await;
    let grocery = Some(Uuid::new_v4());
    let recent = seed_product_in_category(&app, "Dish Soap", dec!(2.00), 50, grocery).await;
    let old = seed_product_in_category(&app, "Sponges", dec!(1.00), 50, grocery).await;
    let user = Uuid::new_v4();

    let recent_order = place_and_deliver(&app, user, vec![line(recent.id, 1)]).await;
    backdate_order(&app, recent_order, 3).await;

    let old_order = place_and_deliver(&app, user, vec![line(old.id, 1)]).await;
    backdate_order(&app, old_order, 20).await;

    let results = app
        .state
        .services
        .recommendations
        .personalized(user, 20)
        .await
        .unwrap();

    let ids: Vec<Uuid> = results.iter().map(|s| s.product.id).collect();
    assert!(
        !ids.contains(&recent.id),
        "a product delivered 3 days ago must not resurface"
    );
    assert!(
        ids.contains(&old.id),
        "a product delivered 20 days ago is eligible again"
    );
}

#[tokio::test]
async fn personalized_prefers_purchased_categories() {
    let app = spawn_app().await;
    let dairy = Some(Uuid::new_v4());
    let hardware = Some(Uuid::new_v4());
    let milk = seed_product_in_category(&app, "Milk", dec!(2.00), 50, dairy).await;
    let kefir = seed_product_in_category(&app, "Kefir", dec!(3.00), 50, dairy).await;
    let screws = seed_product_in_category(&app, "Screws", dec!(4.00), 50, hardware).await;
    let user = Uuid::new_v4();

    let order = place_and_deliver(&app, user, vec![line(milk.id, 1)]).await;
    backdate_order(&app, order, 20).await;

    let results = app
        .state
        .services
        .recommendations
        .personalized(user, 10)
        .await
        .unwrap();

    let pos = |id: Uuid| results.iter().position(|s| s.product.id == id);
    let kefir_pos = pos(kefir.id).expect("same-category product present");
    let screws_pos = pos(screws.id).expect("other-category product present");
    assert!(
        kefir_pos < screws_pos,
        "category affinity outweighs the jitter band"
    );
}

#[tokio::test]
async fn personalized_is_stable_within_a_day() {
    let app = spawn_app().await;
    for i in 0..8 {
        seed_product(&app, &format!("Item {}", i), dec!(1.00), 10).await;
    }
    let user = Uuid::new_v4();

    let first = app
        .state
        .services
        .recommendations
        .personalized(user, 8)
        .await
        .unwrap();
    let second = app
        .state
        .services
        .recommendations
        .personalized(user, 8)
        .await
        .unwrap();

    let first_ids: Vec<Uuid> = first.iter().map(|s| s.product.id).collect();
    let second_ids: Vec<Uuid> = second.iter().map(|s| s.product.id).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn buy_again_ranks_by_repeat_count_and_skips_recent() {
    let app = spawn_app().await;
    let staple = seed_product(&app, "Bread", dec!(2.00), 100).await;
    let occasional = seed_product(&app, "Olives", dec!(3.00), 100).await;
    let just_bought = seed_product(&app, "Candles", dec!(5.00), 100).await;
    let user = Uuid::new_v4();

    for days_ago in [20, 25, 30] {
        let order = place_and_deliver(&app, user, vec![line(staple.id, 1)]).await;
        backdate_order(&app, order, days_ago).await;
    }
    let order = place_and_deliver(&app, user, vec![line(occasional.id, 1)]).await;
    backdate_order(&app, order, 22).await;
    let order = place_and_deliver(&app, user, vec![line(just_bought.id, 1)]).await;
    backdate_order(&app, order, 2).await;

    let results = app
        .state
        .services
        .recommendations
        .buy_again(user, 10)
        .await
        .unwrap();

    let ids: Vec<Uuid> = results.iter().map(|p| p.id).collect();
    assert_eq!(ids.first(), Some(&staple.id), "most repeated first");
    assert!(ids.contains(&occasional.id));
    assert!(!ids.contains(&just_bought.id), "last two weeks excluded");
}

#[tokio::test]
async fn view_tracking_feeds_view_affinity() {
    let app = spawn_app().await;
    let viewed = seed_product(&app, "Chocolate", dec!(2.50), 50).await;
    let ignored = seed_product(&app, "Prunes", dec!(2.50), 50).await;
    let user = Uuid::new_v4();

    for _ in 0..3 {
        app.state
            .services
            .recommendations
            .record_view(user, viewed.id)
            .await
            .unwrap();
    }

    let results = app
        .state
        .services
        .recommendations
        .personalized(user, 10)
        .await
        .unwrap();

    let pos = |id: Uuid| results.iter().position(|s| s.product.id == id);
    let viewed_pos = pos(viewed.id).expect("viewed product present");
    let ignored_pos = pos(ignored.id).expect("unviewed product present");
    assert!(viewed_pos < ignored_pos);
}
