//! Top-headline source.
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::config;
use crate::error::{PipelineError, Result};
use crate::model::Article;

const SERVICE: &str = "newsapi";

#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Up to `n` headlines; articles without a title or description are dropped.
    async fn fetch(&self, n: usize) -> Result<Vec<Article>>;
}

#[derive(Debug, Deserialize)]
struct Headlines {
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    title: Option<String>,
    description: Option<String>,
}

#[derive(Clone)]
pub struct NewsApiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    country: String,
    category: String,
}

impl NewsApiClient {
    pub fn from_config(cfg: &config::NewsApi) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| PipelineError::validation(format!("news base_url: {}", e)))?;
        let http = Client::builder().user_agent("alien-newsroom/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            country: cfg.country.clone(),
            category: cfg.category.clone(),
        })
    }

    pub fn build_request(&self, n: usize) -> Result<reqwest::Request> {
        let url = self
            .base_url
            .join("v2/top-headlines")
            .map_err(|e| PipelineError::validation(format!("news endpoint: {}", e)))?;
        let page_size = n.clamp(1, 100).to_string();
        Ok(self
            .http
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("language", "en"),
                ("country", self.country.as_str()),
                ("category", self.category.as_str()),
                ("pageSize", page_size.as_str()),
            ])
            .build()?)
    }
}

fn usable(raw: Vec<RawArticle>, n: usize) -> Vec<Article> {
    raw.into_iter()
        .filter_map(|a| {
            let title = a.title.filter(|t| !t.trim().is_empty())?;
            let description = a.description.filter(|d| !d.trim().is_empty())?;
            Some(Article { title, description })
        })
        .take(n)
        .collect()
}

#[async_trait]
impl NewsSource for NewsApiClient {
    #[instrument(skip_all, fields(n = n))]
    async fn fetch(&self, n: usize) -> Result<Vec<Article>> {
        let res = self.http.execute(self.build_request(n)?).await?;
        let status = res.status();
        if !status.is_success() {
            return Err(PipelineError::Upstream {
                service: SERVICE,
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        let headlines: Headlines = res.json().await?;
        let received = headlines.articles.len();
        let articles = usable(headlines.articles, n);
        info!(received, usable = articles.len(), "fetched headlines");
        Ok(articles)
    }
}
