// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskType;
use crate::ipc::message::PlatformTarget;
use crate::utils::errors::ExtractionError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; scrapeflow/1.0)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").ok());

/// 单页抓取请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub keyword: String,
    pub location: Option<String>,
    /// 从1开始的页码
    pub page: u32,
}

/// 抓取到的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedRecord {
    pub keyword: String,
    pub page: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
}

/// 页面抓取器
///
/// 返回空列表表示该关键词已没有更多结果
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, request: &PageRequest) -> Result<Vec<ScrapedRecord>, ExtractionError>;
}

/// 基于HTTP的页面抓取器
pub struct HttpPageExtractor {
    client: reqwest::Client,
    target: PlatformTarget,
    task_type: TaskType,
}

impl HttpPageExtractor {
    /// 创建抓取器
    ///
    /// # 参数
    ///
    /// * `target` - 平台的URL模板与结果选择器
    /// * `task_type` - 任务类型，决定记录的解析方式
    /// * `proxy` - 可选的代理地址
    ///
    /// # 返回值
    ///
    /// * `Ok(HttpPageExtractor)` - 抓取器
    /// * `Err(ExtractionError)` - 选择器或代理无效
    pub fn new(
        target: PlatformTarget,
        task_type: TaskType,
        proxy: Option<&str>,
    ) -> Result<Self, ExtractionError> {
        Selector::parse(&target.result_selector)
            .map_err(|_| ExtractionError::Selector(target.result_selector.clone()))?;

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true);

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|_| ExtractionError::Proxy(proxy_url.to_string()))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
            target,
            task_type,
        })
    }
}

#[async_trait]
impl PageExtractor for HttpPageExtractor {
    async fn extract(&self, request: &PageRequest) -> Result<Vec<ScrapedRecord>, ExtractionError> {
        let url = render_url(
            &self.target.url_template,
            &request.keyword,
            request.location.as_deref(),
            request.page,
        )?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_records(
            &body,
            &self.target.result_selector,
            self.task_type,
            &url,
            request,
        )
    }
}

/// 填充URL模板
///
/// 支持 `{keyword}`、`{location}` 与 `{page}` 占位符，值经过URL编码
pub fn render_url(
    template: &str,
    keyword: &str,
    location: Option<&str>,
    page: u32,
) -> Result<Url, ExtractionError> {
    let rendered = template
        .replace("{keyword}", &urlencoding::encode(keyword))
        .replace("{location}", &urlencoding::encode(location.unwrap_or("")))
        .replace("{page}", &page.to_string());

    Url::parse(&rendered).map_err(|e| ExtractionError::Template(format!("{rendered}: {e}")))
}

/// 从页面中解析记录
///
/// 每个匹配选择器的元素产生一条记录；邮箱提取任务只保留包含邮箱的元素
pub fn parse_records(
    html: &str,
    selector: &str,
    task_type: TaskType,
    base_url: &Url,
    request: &PageRequest,
) -> Result<Vec<ScrapedRecord>, ExtractionError> {
    let selector =
        Selector::parse(selector).map_err(|_| ExtractionError::Selector(selector.to_string()))?;
    let document = Html::parse_document(html);

    let records = document
        .select(&selector)
        .filter_map(|element| {
            let title = normalize_text(element);
            let url = link_of(element).and_then(|href| base_url.join(&href).ok().map(String::from));
            let emails = match task_type {
                TaskType::EmailExtraction => emails_in(&element.html()),
                TaskType::DirectoryScrape | TaskType::SearchEngineScrape => Vec::new(),
            };

            if task_type == TaskType::EmailExtraction && emails.is_empty() {
                return None;
            }
            if title.is_empty() && url.is_none() {
                return None;
            }

            Some(ScrapedRecord {
                keyword: request.keyword.clone(),
                page: request.page,
                title,
                url,
                emails,
            })
        })
        .collect();

    Ok(records)
}

fn normalize_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn link_of(element: ElementRef<'_>) -> Option<String> {
    if let Some(href) = element.value().attr("href") {
        return Some(href.to_string());
    }

    let anchor = Selector::parse("a[href]").ok()?;
    element
        .select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

fn emails_in(fragment: &str) -> Vec<String> {
    let Some(pattern) = EMAIL_PATTERN.as_ref() else {
        return Vec::new();
    };

    let unique: BTreeSet<String> = pattern
        .find_iter(fragment)
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
        .collect();
    unique.into_iter().collect()
}
