use async_trait::async_trait;
use js_sys::{Array, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, BlobPropertyBag, FormData, Headers, Request, RequestInit, Response, ResponseInit};

use crate::error::{CoreError, Result};
use crate::transport::{FormPart, HttpBody, HttpRequest, HttpResponse, Method, Transport};
use crate::web;

/// fetch APIによるTransport
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchTransport;

impl FetchTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl Transport for FetchTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let web_request = to_web_request(&request)?;
        let response = web::fetch(&web_request).await?;
        from_web_response(response).await
    }
}

/// HttpRequest → web_sys::Request
pub fn to_web_request(request: &HttpRequest) -> Result<Request> {
    let init = RequestInit::new();
    init.set_method(request.method.as_str());

    let headers = Headers::new()?;
    for (name, value) in &request.headers {
        headers.set(name, value)?;
    }

    match &request.body {
        HttpBody::Empty => {}
        HttpBody::Json(json) => {
            headers.set("Content-Type", "application/json")?;
            init.set_body(&JsValue::from_str(json));
        }
        HttpBody::Multipart(parts) => {
            // Content-Typeのboundaryはブラウザに任せる
            let form = to_form_data(parts)?;
            init.set_body(&form);
        }
        HttpBody::Bytes(bytes) => {
            init.set_body(&Uint8Array::from(bytes.as_slice()));
        }
    }
    init.set_headers(&headers);

    Ok(Request::new_with_str_and_init(&request.url, &init)?)
}

fn to_form_data(parts: &[FormPart]) -> Result<FormData> {
    let form = FormData::new()?;
    for part in parts {
        match part {
            FormPart::Text { name, value } => form.append_with_str(name, value)?,
            FormPart::File {
                name,
                file_name,
                mime_type,
                bytes,
            } => {
                let chunks = Array::new();
                chunks.push(&Uint8Array::from(bytes.as_slice()));
                let bag = BlobPropertyBag::new();
                bag.set_type(mime_type);
                let blob = Blob::new_with_u8_array_sequence_and_options(&chunks, &bag)?;
                form.append_with_blob_and_filename(name, &blob, file_name)?;
            }
        }
    }
    Ok(form)
}

/// web_sys::Response → HttpResponse
///
/// 本文の読み込み途中で切れた場合も接続エラー扱い。
pub async fn from_web_response(response: Response) -> Result<HttpResponse> {
    let status = response.status();
    let opaque = status == 0;
    let headers = read_headers(&response.headers())?;

    let body = if opaque {
        Vec::new()
    } else {
        let buffer = JsFuture::from(response.array_buffer()?)
            .await
            .map_err(|e| CoreError::Connectivity(web::js_error_message(&e)))?;
        Uint8Array::new(&buffer).to_vec()
    };

    Ok(HttpResponse {
        status,
        opaque,
        headers,
        body,
    })
}

/// Service Workerが横取りしたリクエストを読み込む
pub async fn from_web_request(request: &Request) -> Result<HttpRequest> {
    let method = Method::parse(&request.method())
        .ok_or_else(|| CoreError::Other(format!("Unsupported method {}", request.method())))?;
    let headers = read_headers(&request.headers())?;

    let body = if method == Method::Get {
        HttpBody::Empty
    } else {
        // 本体は一度しか読めないのでcloneから読む
        let copy = request.clone()?;
        let buffer = JsFuture::from(copy.array_buffer()?).await?;
        HttpBody::Bytes(Uint8Array::new(&buffer).to_vec())
    };

    Ok(HttpRequest {
        method,
        url: request.url(),
        headers,
        body,
    })
}

/// HttpResponse → web_sys::Response
///
/// opaqueレスポンスはJSから再構築できないのでNone
pub fn to_web_response(response: &HttpResponse) -> Result<Option<Response>> {
    if response.opaque {
        return Ok(None);
    }

    let headers = Headers::new()?;
    for (name, value) in &response.headers {
        headers.set(name, value)?;
    }

    let init = ResponseInit::new();
    init.set_status(response.status);
    init.set_headers(&headers);

    let web_response = if is_null_body_status(response.status) {
        Response::new_with_opt_u8_array_and_init(None, &init)?
    } else {
        let mut body = response.body.clone();
        Response::new_with_opt_u8_array_and_init(Some(&mut body), &init)?
    };
    Ok(Some(web_response))
}

/// 本体を持てないステータス（Responseのコンストラクタが例外を投げる）
pub fn is_null_body_status(status: u16) -> bool {
    matches!(status, 101 | 103 | 204 | 205 | 304)
}

fn read_headers(headers: &Headers) -> Result<Vec<(String, String)>> {
    let mut result = Vec::new();
    let iter = match js_sys::try_iter(headers)? {
        Some(iter) => iter,
        None => return Ok(result),
    };

    for entry in iter {
        let pair: Array = entry?.dyn_into()?;
        if let (Some(name), Some(value)) = (pair.get(0).as_string(), pair.get(1).as_string()) {
            result.push((name, value));
        }
    }
    Ok(result)
}
