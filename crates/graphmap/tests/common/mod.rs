//! Blog fixture shared by the scenario tests.
//!
//! Users own posts, posts own comments and carry tags through `posts_tags`.
//! Seed data:
//!
//! - users: u1 "Ada", u2 "Bob"
//! - posts: p1 "Hello" and p2 "Again" by u1, p3 "Howdy" by u2
//! - comments: c1 and c2 on p1
//! - tags: t1 "rust", t2 "db", t3 "orm"; p1 has t1 and t2, p3 has t1

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use graphmap::prelude::*;

pub struct User {
    pub id: String,
    pub name: String,
    pub posts: CollectionProxy,
}

pub struct Post {
    pub id: String,
    pub subject: String,
    pub author: Option<SingleProxy>,
    pub comments: CollectionProxy,
    pub tags: CollectionProxy,
}

pub struct Comment {
    pub id: String,
    pub body: String,
}

pub struct Tag {
    pub id: String,
    pub name: String,
}

impl Entity for User {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(&self.id)),
            "name" => Some(Value::from(&self.name)),
            _ => None,
        }
    }
}

impl Entity for Post {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(&self.id)),
            "subject" => Some(Value::from(&self.subject)),
            _ => None,
        }
    }
}

impl Entity for Comment {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(&self.id)),
            "body" => Some(Value::from(&self.body)),
            _ => None,
        }
    }
}

impl Entity for Tag {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(&self.id)),
            "name" => Some(Value::from(&self.name)),
            _ => None,
        }
    }
}

pub fn registry() -> MappingRegistry {
    let user = RelationMapping::new(
        "user",
        "users",
        |row| {
            Ok(Node::new(User {
                id: row.value("id")?,
                name: row.value("name")?,
                posts: row.collection("posts")?,
            }))
        },
        |node| {
            let user = node.downcast::<User>().ok_or("not a user")?;
            let user = user.borrow();
            Ok(Dump::new()
                .attr("id", &user.id)
                .attr("name", &user.name)
                .many("posts", &user.posts))
        },
    )
    .fields(["id", "name"])
    .association(
        "posts",
        Association::one_to_many("post", "id", "author_id").order_by("id", Direction::Asc),
    )
    .subset("named_ada", |ds| ds.where_eq("name", "Ada"));

    let post = RelationMapping::new(
        "post",
        "posts",
        |row| {
            Ok(Node::new(Post {
                id: row.value("id")?,
                subject: row.value("subject")?,
                author: row.single("author")?,
                comments: row.collection("comments")?,
                tags: row.collection("tags")?,
            }))
        },
        |node| {
            let post = node.downcast::<Post>().ok_or("not a post")?;
            let post = post.borrow();
            Ok(Dump::new()
                .attr("id", &post.id)
                .attr("subject", &post.subject)
                .one("author", post.author.as_ref())
                .many("comments", &post.comments)
                .many("tags", &post.tags))
        },
    )
    .fields(["id", "subject", "author_id"])
    .association("author", Association::many_to_one("user", "author_id", "id"))
    .association(
        "comments",
        Association::one_to_many("comment", "id", "post_id").order_by("id", Direction::Asc),
    )
    .association(
        "tags",
        Association::many_to_many(
            "tag",
            "id",
            "id",
            JoinTable::new("posts_tags", "post_id", "tag_id"),
        ),
    );

    let comment = RelationMapping::new(
        "comment",
        "comments",
        |row| {
            Ok(Node::new(Comment {
                id: row.value("id")?,
                body: row.value("body")?,
            }))
        },
        |node| {
            let comment = node.downcast::<Comment>().ok_or("not a comment")?;
            let comment = comment.borrow();
            Ok(Dump::new()
                .attr("id", &comment.id)
                .attr("body", &comment.body))
        },
    )
    .fields(["id", "body", "post_id"]);

    let tag = RelationMapping::new(
        "tag",
        "tags",
        |row| {
            Ok(Node::new(Tag {
                id: row.value("id")?,
                name: row.value("name")?,
            }))
        },
        |node| {
            let tag = node.downcast::<Tag>().ok_or("not a tag")?;
            let tag = tag.borrow();
            Ok(Dump::new().attr("id", &tag.id).attr("name", &tag.name))
        },
    )
    .fields(["id", "name"]);

    MappingRegistry::new()
        .with(user)
        .with(post)
        .with(comment)
        .with(tag)
}

pub struct Blog {
    pub facade: StoreFacade,
    pub storage: Arc<MemoryStorage>,
}

impl Blog {
    /// An empty blog.
    pub fn empty() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let facade = StoreFacade::with_config(Rc::new(registry()), storage.clone(), config)
            .expect("blog registry is valid");
        Self { facade, storage }
    }

    /// The seeded blog described in the module docs, with a clean write log.
    pub fn seeded() -> Self {
        let blog = Self::empty();
        blog.add_user("u1", "Ada");
        blog.add_user("u2", "Bob");
        blog.add_post("p1", "Hello", Some("u1"));
        blog.add_post("p2", "Again", Some("u1"));
        blog.add_post("p3", "Howdy", Some("u2"));
        blog.add_comment("c1", "first", "p1");
        blog.add_comment("c2", "second", "p1");
        blog.add_tag("t1", "rust");
        blog.add_tag("t2", "db");
        blog.add_tag("t3", "orm");
        blog.tag_post("p1", "t1");
        blog.tag_post("p1", "t2");
        blog.tag_post("p3", "t1");
        blog.storage.clear_log();
        blog
    }

    pub fn add_user(&self, id: &str, name: &str) {
        self.storage
            .insert_row("users", [("id", Value::from(id)), ("name", Value::from(name))]);
    }

    pub fn add_post(&self, id: &str, subject: &str, author: Option<&str>) {
        self.storage.insert_row(
            "posts",
            [
                ("id", Value::from(id)),
                ("subject", Value::from(subject)),
                ("author_id", Value::from(author)),
            ],
        );
    }

    pub fn add_comment(&self, id: &str, body: &str, post: &str) {
        self.storage.insert_row(
            "comments",
            [
                ("id", Value::from(id)),
                ("body", Value::from(body)),
                ("post_id", Value::from(post)),
            ],
        );
    }

    pub fn add_tag(&self, id: &str, name: &str) {
        self.storage
            .insert_row("tags", [("id", Value::from(id)), ("name", Value::from(name))]);
    }

    pub fn tag_post(&self, post: &str, tag: &str) {
        self.storage.insert_row(
            "posts_tags",
            [("post_id", Value::from(post)), ("tag_id", Value::from(tag))],
        );
    }

    pub fn store(&self, name: &str) -> Store {
        self.facade.store(name).expect("mapping is registered")
    }

    /// Load one row of `mapping` by id.
    pub fn find(&self, mapping: &str, id: &str) -> Node {
        self.store(mapping)
            .where_eq("id", id)
            .first()
            .expect("query succeeds")
            .expect("row exists")
    }

    /// Column `field` of the stored row `id` in `namespace`.
    pub fn stored(&self, namespace: &str, id: &str, field: &str) -> Option<Value> {
        self.storage
            .rows(namespace)
            .into_iter()
            .find(|row| row.get("id") == Some(&Value::from(id)))
            .and_then(|row| row.get(field).cloned())
    }
}

pub fn user(node: &Node) -> ObjectRef<User> {
    node.downcast::<User>().expect("node is a user")
}

pub fn post(node: &Node) -> ObjectRef<Post> {
    node.downcast::<Post>().expect("node is a post")
}

pub fn tag(node: &Node) -> ObjectRef<Tag> {
    node.downcast::<Tag>().expect("node is a tag")
}

pub fn new_user(id: &str, name: &str) -> ObjectRef<User> {
    Rc::new(RefCell::new(User {
        id: id.into(),
        name: name.into(),
        posts: CollectionProxy::new(),
    }))
}

pub fn new_post(id: &str, subject: &str) -> ObjectRef<Post> {
    Rc::new(RefCell::new(Post {
        id: id.into(),
        subject: subject.into(),
        author: None,
        comments: CollectionProxy::new(),
        tags: CollectionProxy::new(),
    }))
}

pub fn new_comment(id: &str, body: &str) -> Node {
    Node::new(Comment {
        id: id.into(),
        body: body.into(),
    })
}

/// Sorted ids of the nodes in `proxy`, loading it if needed.
pub fn ids(proxy: &CollectionProxy) -> Vec<String> {
    let mut ids: Vec<String> = proxy
        .nodes()
        .expect("collection loads")
        .iter()
        .filter_map(|n| n.field("id"))
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    ids.sort();
    ids
}
