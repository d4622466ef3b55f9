//! Blog CRUD service backed by a [`RecordStore`]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::errors::Status;
use crate::record_store::{BlogRecord, RecordKey, RecordStore};
use crate::rpc::{
    decode, encode, CallContext, DispatchError, Dispatcher, Handler, MessageSender, MethodId,
};

pub const SERVICE: &str = "blog.BlogService";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blog {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl Blog {
    fn from_record(key: &RecordKey, record: BlogRecord) -> Self {
        Self {
            id: key.to_string(),
            author_id: record.author_id,
            title: record.title,
            content: record.content,
        }
    }

    fn into_record(self) -> BlogRecord {
        BlogRecord {
            author_id: self.author_id,
            title: self.title,
            content: self.content,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlogMessage {
    pub blog: Blog,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlogIdMessage {
    pub blog_id: String,
}

pub fn register(
    dispatcher: &mut Dispatcher,
    store: Arc<dyn RecordStore>,
) -> Result<(), DispatchError> {
    let create_store = Arc::clone(&store);
    dispatcher.register(
        MethodId::new(SERVICE, "CreateBlog"),
        Handler::unary(move |_context: CallContext, request: Value| {
            create_blog(Arc::clone(&create_store), request)
        }),
    )?;

    let read_store = Arc::clone(&store);
    dispatcher.register(
        MethodId::new(SERVICE, "ReadBlog"),
        Handler::unary(move |_context: CallContext, request: Value| {
            read_blog(Arc::clone(&read_store), request)
        }),
    )?;

    let update_store = Arc::clone(&store);
    dispatcher.register(
        MethodId::new(SERVICE, "UpdateBlog"),
        Handler::unary(move |_context: CallContext, request: Value| {
            update_blog(Arc::clone(&update_store), request)
        }),
    )?;

    let delete_store = Arc::clone(&store);
    dispatcher.register(
        MethodId::new(SERVICE, "DeleteBlog"),
        Handler::unary(move |_context: CallContext, request: Value| {
            delete_blog(Arc::clone(&delete_store), request)
        }),
    )?;

    dispatcher.register(
        MethodId::new(SERVICE, "ListBlog"),
        Handler::server_stream(
            move |_context: CallContext, request: Value, responses: MessageSender<Value>| {
                list_blog(Arc::clone(&store), request, responses)
            },
        ),
    )?;
    Ok(())
}

fn parse_key(blog_id: &str) -> Result<RecordKey, Status> {
    Ok(blog_id.parse::<RecordKey>()?)
}

async fn create_blog(store: Arc<dyn RecordStore>, request: Value) -> Result<Value, Status> {
    let BlogMessage { blog } = decode(request)?;
    info!(author_id = %blog.author_id, title = %blog.title, "received CreateBlog call");

    let record = blog.into_record();
    let key = store.create(record.clone()).await?;

    encode(&BlogMessage {
        blog: Blog::from_record(&key, record),
    })
}

async fn read_blog(store: Arc<dyn RecordStore>, request: Value) -> Result<Value, Status> {
    let BlogIdMessage { blog_id } = decode(request)?;
    info!(blog_id = %blog_id, "received ReadBlog call");

    let key = parse_key(&blog_id)?;
    let record = store.read(&key).await?;

    encode(&BlogMessage {
        blog: Blog::from_record(&key, record),
    })
}

async fn update_blog(store: Arc<dyn RecordStore>, request: Value) -> Result<Value, Status> {
    let BlogMessage { blog } = decode(request)?;
    info!(blog_id = %blog.id, "received UpdateBlog call");

    let key = parse_key(&blog.id)?;
    let record = store.update(&key, blog.into_record()).await?;

    encode(&BlogMessage {
        blog: Blog::from_record(&key, record),
    })
}

async fn delete_blog(store: Arc<dyn RecordStore>, request: Value) -> Result<Value, Status> {
    let BlogIdMessage { blog_id } = decode(request)?;
    info!(blog_id = %blog_id, "received DeleteBlog call");

    let key = parse_key(&blog_id)?;
    store.delete(&key).await?;

    encode(&BlogIdMessage {
        blog_id: key.to_string(),
    })
}

async fn list_blog(
    store: Arc<dyn RecordStore>,
    _request: Value,
    mut responses: MessageSender<Value>,
) -> Result<(), Status> {
    info!("received ListBlog call");

    for (key, record) in store.list_all().await? {
        responses
            .send_json(&BlogMessage {
                blog: Blog::from_record(&key, record),
            })
            .await?;
    }
    Ok(())
}
