// SPDX-License-Identifier: MIT

//! Research aggregator: fan-out to Reddit, RSS feeds, CoinGecko and Groq,
//! merged into one bundle per topic.
//!
//! Individual source failures degrade to empty sections; only a total
//! failure surfaces as an error. Bundles are cached per topic for ten
//! minutes with single-flight refresh.

use crate::config::Config;
use crate::error::AppError;
use crate::services::cache::SingleFlightCache;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// How long research bundles are served from cache.
const RESEARCH_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Per-source item caps keep bundles (and the Groq prompt) bounded.
const MAX_ITEMS_PER_SOURCE: usize = 5;
const MAX_CONCURRENT_FEEDS: usize = 4;

const COINGECKO_TRENDING_URL: &str = "https://api.coingecko.com/api/v3/search/trending";
const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const GROQ_MODEL: &str = "llama-3.3-70b-versatile";

/// A Reddit post surfaced by topic search.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RedditItem {
    pub title: String,
    pub permalink: String,
    pub score: i64,
    pub subreddit: String,
}

/// An RSS feed item (title + link).
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
}

/// A trending coin from CoinGecko.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TrendingCoin {
    pub name: String,
    pub symbol: String,
}

/// Merged research result for one topic.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ResearchBundle {
    pub topic: String,
    pub reddit: Vec<RedditItem>,
    pub feeds: Vec<FeedItem>,
    pub trending: Vec<TrendingCoin>,
    /// Groq-generated content-idea summary; None when the key is absent
    /// or the call failed
    pub summary: Option<String>,
    pub fetched_at: String,
}

/// Research aggregation service.
#[derive(Clone)]
pub struct ResearchService {
    http: reqwest::Client,
    subreddits: Vec<String>,
    feeds: Vec<String>,
    groq_api_key: Option<String>,
    user_agent: String,
    cache: Arc<SingleFlightCache<ResearchBundle>>,
}

impl ResearchService {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            subreddits: config.research_subreddits.clone(),
            feeds: config.research_feeds.clone(),
            groq_api_key: config.groq_api_key.clone(),
            user_agent: config.reddit_user_agent.clone(),
            cache: Arc::new(SingleFlightCache::new(RESEARCH_CACHE_TTL)),
        }
    }

    /// Research a topic, served from the 10-minute cache.
    pub async fn research(&self, topic: &str) -> Result<ResearchBundle, AppError> {
        let topic_owned = topic.to_string();
        self.cache
            .get_or_fetch(&topic.to_lowercase(), || self.fetch_bundle(topic_owned))
            .await
    }

    /// Fan out to all sources and merge. Each source degrades to empty on
    /// failure; the Groq summary degrades to None.
    async fn fetch_bundle(&self, topic: String) -> Result<ResearchBundle, AppError> {
        let (reddit, feeds, trending) = tokio::join!(
            self.fetch_reddit(&topic),
            self.fetch_feeds(),
            self.fetch_trending(),
        );

        let reddit = reddit.unwrap_or_else(|e| {
            tracing::warn!(error = %e, topic, "Reddit fetch failed, returning empty section");
            Vec::new()
        });
        let feeds = feeds.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Feed fetch failed, returning empty section");
            Vec::new()
        });
        let trending = trending.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "CoinGecko fetch failed, returning empty section");
            Vec::new()
        });

        let summary = self.summarize(&topic, &reddit, &feeds, &trending).await;

        Ok(ResearchBundle {
            topic,
            reddit,
            feeds,
            trending,
            summary,
            fetched_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    // ─── Reddit ──────────────────────────────────────────────────────────

    /// Search each configured subreddit for the topic (public JSON API).
    async fn fetch_reddit(&self, topic: &str) -> Result<Vec<RedditItem>, AppError> {
        let mut items: Vec<RedditItem> = stream::iter(self.subreddits.clone())
            .map(|subreddit| {
                let http = self.http.clone();
                let user_agent = self.user_agent.clone();
                let topic = topic.to_string();
                async move {
                    let url = format!(
                        "https://www.reddit.com/r/{}/search.json?q={}&restrict_sr=1&sort=hot&limit={}",
                        subreddit,
                        urlencoding::encode(&topic),
                        MAX_ITEMS_PER_SOURCE
                    );

                    let response = http
                        .get(&url)
                        .header(reqwest::header::USER_AGENT, user_agent)
                        .send()
                        .await
                        .map_err(|e| AppError::Upstream(format!("Reddit request failed: {}", e)))?;

                    if !response.status().is_success() {
                        return Err(AppError::Upstream(format!(
                            "Reddit returned status {}",
                            response.status()
                        )));
                    }

                    let listing: RedditListing = response.json().await.map_err(|e| {
                        AppError::Upstream(format!("Reddit parse error: {}", e))
                    })?;

                    Ok::<_, AppError>(
                        listing
                            .data
                            .children
                            .into_iter()
                            .map(|child| RedditItem {
                                title: child.data.title,
                                permalink: format!(
                                    "https://www.reddit.com{}",
                                    child.data.permalink
                                ),
                                score: child.data.score,
                                subreddit: child.data.subreddit,
                            })
                            .collect::<Vec<_>>(),
                    )
                }
            })
            .buffer_unordered(MAX_CONCURRENT_FEEDS)
            .filter_map(|result| async move {
                match result {
                    Ok(items) => Some(items),
                    Err(e) => {
                        tracing::debug!(error = %e, "Subreddit fetch failed, skipping");
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        // Highest-scored first, bounded
        items.sort_by(|a, b| b.score.cmp(&a.score));
        items.truncate(MAX_ITEMS_PER_SOURCE * 2);
        Ok(items)
    }

    // ─── RSS ─────────────────────────────────────────────────────────────

    /// Pull configured RSS feeds and extract item titles/links.
    async fn fetch_feeds(&self) -> Result<Vec<FeedItem>, AppError> {
        let items: Vec<FeedItem> = stream::iter(self.feeds.clone())
            .map(|url| {
                let http = self.http.clone();
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| AppError::Upstream(format!("Feed request failed: {}", e)))?;

                    if !response.status().is_success() {
                        return Err(AppError::Upstream(format!(
                            "Feed {} returned status {}",
                            url,
                            response.status()
                        )));
                    }

                    let body = response.text().await.map_err(|e| {
                        AppError::Upstream(format!("Feed body read failed: {}", e))
                    })?;

                    Ok::<_, AppError>(scan_rss_items(&body, MAX_ITEMS_PER_SOURCE))
                }
            })
            .buffer_unordered(MAX_CONCURRENT_FEEDS)
            .filter_map(|result| async move {
                match result {
                    Ok(items) => Some(items),
                    Err(e) => {
                        tracing::debug!(error = %e, "Feed fetch failed, skipping");
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        Ok(items)
    }

    // ─── CoinGecko ───────────────────────────────────────────────────────

    /// Trending coins (no auth required).
    async fn fetch_trending(&self) -> Result<Vec<TrendingCoin>, AppError> {
        let response = self
            .http
            .get(COINGECKO_TRENDING_URL)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("CoinGecko request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "CoinGecko returned status {}",
                response.status()
            )));
        }

        let body: CoingeckoTrending = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("CoinGecko parse error: {}", e)))?;

        Ok(body
            .coins
            .into_iter()
            .take(MAX_ITEMS_PER_SOURCE)
            .map(|c| TrendingCoin {
                name: c.item.name,
                symbol: c.item.symbol,
            })
            .collect())
    }

    // ─── Groq Summarization ──────────────────────────────────────────────

    /// Summarize the gathered material into content ideas. Best effort.
    async fn summarize(
        &self,
        topic: &str,
        reddit: &[RedditItem],
        feeds: &[FeedItem],
        trending: &[TrendingCoin],
    ) -> Option<String> {
        let api_key = self.groq_api_key.as_ref()?;

        if reddit.is_empty() && feeds.is_empty() && trending.is_empty() {
            return None;
        }

        let mut material = String::new();
        for item in reddit {
            material.push_str(&format!("- [reddit r/{}] {}\n", item.subreddit, item.title));
        }
        for item in feeds {
            material.push_str(&format!("- [feed] {}\n", item.title));
        }
        for coin in trending {
            material.push_str(&format!("- [trending] {} ({})\n", coin.name, coin.symbol));
        }

        let request = serde_json::json!({
            "model": GROQ_MODEL,
            "messages": [
                {
                    "role": "system",
                    "content": "You suggest short social media content ideas. Reply with 3 bullet points."
                },
                {
                    "role": "user",
                    "content": format!(
                        "Topic: {}\n\nSource material:\n{}",
                        topic, material
                    )
                }
            ],
            "max_tokens": 256
        });

        let result = self
            .http
            .post(GROQ_CHAT_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "Groq returned non-success, skipping summary");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Groq request failed, skipping summary");
                return None;
            }
        };

        let body: GroqResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "Groq parse error, skipping summary");
                return None;
            }
        };

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
    }
}

/// Extract up to `max` `<item>` titles and links from an RSS document.
///
/// None of the repos we depend on pull in an XML parser, and we only need
/// two well-known tags from well-formed feeds, so this is a plain scanner
/// rather than a full parser. Unrecognized structure yields fewer items,
/// never an error.
fn scan_rss_items(body: &str, max: usize) -> Vec<FeedItem> {
    let mut items = Vec::new();
    let mut rest = body;

    while items.len() < max {
        let Some(start) = rest.find("<item>").or_else(|| rest.find("<item ")) else {
            break;
        };
        let rest_after = &rest[start..];
        let Some(end) = rest_after.find("</item>") else {
            break;
        };

        let item_block = &rest_after[..end];
        let title = extract_tag(item_block, "title");
        let link = extract_tag(item_block, "link");

        if let (Some(title), Some(link)) = (title, link) {
            items.push(FeedItem { title, link });
        }

        rest = &rest_after[end + "</item>".len()..];
    }

    items
}

/// Extract the text content of the first `<tag>...</tag>`, unwrapping CDATA.
fn extract_tag(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;

    let raw = block[start..end].trim();
    let text = raw
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(raw)
        .trim();

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// ─── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditChildData,
}

#[derive(Debug, Deserialize)]
struct RedditChildData {
    title: String,
    permalink: String,
    score: i64,
    subreddit: String,
}

#[derive(Debug, Deserialize)]
struct CoingeckoTrending {
    coins: Vec<CoingeckoCoin>,
}

#[derive(Debug, Deserialize)]
struct CoingeckoCoin {
    item: CoingeckoCoinItem,
}

#[derive(Debug, Deserialize)]
struct CoingeckoCoinItem {
    name: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqMessage,
}

#[derive(Debug, Deserialize)]
struct GroqMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <item>
      <title>First post</title>
      <link>https://example.com/1</link>
    </item>
    <item>
      <title><![CDATA[Second & post]]></title>
      <link>https://example.com/2</link>
    </item>
    <item>
      <title>Third post</title>
      <link>https://example.com/3</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_scan_rss_items_extracts_titles_and_links() {
        let items = scan_rss_items(SAMPLE_FEED, 10);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "First post");
        assert_eq!(items[0].link, "https://example.com/1");
        assert_eq!(items[1].title, "Second & post"); // CDATA unwrapped
    }

    #[test]
    fn test_scan_rss_items_respects_cap() {
        let items = scan_rss_items(SAMPLE_FEED, 2);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_scan_rss_items_tolerates_garbage() {
        assert!(scan_rss_items("", 5).is_empty());
        assert!(scan_rss_items("<html>not a feed</html>", 5).is_empty());
        assert!(scan_rss_items("<item><title>no link</title></item>", 5).is_empty());
        // Unclosed item does not loop or panic
        assert!(scan_rss_items("<item><title>x</title><link>y</link>", 5).is_empty());
    }
}
