// SPDX-License-Identifier: MIT

//! Benchmarks for the hot gamification paths: streak updates (run inside
//! Firestore transactions, so retries multiply the cost) and tier
//! derivation (run on every gated request).

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use postforge::models::achievement::newly_unlocked;
use postforge::models::{Tier, UserStreak};

fn bench_streak_year_of_posts(c: &mut Criterion) {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

    c.bench_function("streak_record_365_days", |b| {
        b.iter(|| {
            let mut streak = UserStreak::default();
            let mut day = start;
            for i in 0..365u32 {
                streak.record_post(&format!("post_{}", i), black_box(day), "now");
                day = day.succ_opt().unwrap();
            }
            black_box(streak.current_streak)
        })
    });
}

fn bench_achievement_check(c: &mut Criterion) {
    let mut streak = UserStreak::default();
    let mut day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    for i in 0..50u32 {
        streak.record_post(&format!("post_{}", i), day, "now");
        day = day.succ_opt().unwrap();
    }

    c.bench_function("achievement_newly_unlocked", |b| {
        b.iter(|| black_box(newly_unlocked(black_box(&streak), 4)))
    });
}

fn bench_tier_derivation(c: &mut Criterion) {
    c.bench_function("tier_from_token_balance", |b| {
        b.iter(|| {
            let mut rank_sum = 0usize;
            for balance in [0.0, 999.0, 1_000.0, 9_999.0, 10_000.0, 50_000.0, 1e9] {
                rank_sum += Tier::from_token_balance(black_box(balance)) as usize;
            }
            black_box(rank_sum)
        })
    });
}

criterion_group!(
    benches,
    bench_streak_year_of_posts,
    bench_achievement_check,
    bench_tier_derivation
);
criterion_main!(benches);
