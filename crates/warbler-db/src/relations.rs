//! Relationship accessors on [`User`]. Each call is a fresh query against the
//! given store; nothing is cached on the user value.

use crate::models::{Follow, Message, User};
use crate::{Database, Result};

impl User {
    pub fn messages(&self, db: &Database) -> Result<Vec<Message>> {
        db.list_messages(self.id)
    }

    /// Users who follow `self`.
    pub fn followers(&self, db: &Database) -> Result<Vec<User>> {
        db.list_followers(self.id)
    }

    /// Users `self` follows.
    pub fn following(&self, db: &Database) -> Result<Vec<User>> {
        db.list_following(self.id)
    }

    pub fn likes(&self, db: &Database) -> Result<Vec<Message>> {
        db.list_liked_messages(self.id)
    }

    /// Record that `follower` follows `self`.
    pub fn add_follower(&self, db: &Database, follower: &User) -> Result<bool> {
        db.follow(Follow::new(follower.id, self.id))
    }

    /// Record that `self` follows `other`.
    pub fn follow(&self, db: &Database, other: &User) -> Result<bool> {
        db.follow(Follow::new(self.id, other.id))
    }

    pub fn unfollow(&self, db: &Database, other: &User) -> Result<bool> {
        db.unfollow(Follow::new(self.id, other.id))
    }

    /// True if `self` is in `other`'s follower set.
    pub fn is_following(&self, db: &Database, other: &User) -> Result<bool> {
        db.is_following(self.id, other.id)
    }

    /// True if `other` is in `self`'s follower set.
    pub fn is_followed_by(&self, db: &Database, other: &User) -> Result<bool> {
        db.is_following(other.id, self.id)
    }
}
