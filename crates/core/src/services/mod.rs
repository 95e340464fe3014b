//! Business logic services.

#![allow(missing_docs)]

pub mod attendee;
pub mod auth;
pub mod countdown;
pub mod downstream;
pub mod group;
pub mod mail;
pub mod room;

pub use attendee::{
    Attendee, AttendeeRegistry, AttendeeStatus, HttpAttendeeRegistry, SharedAttendeeRegistry,
};
pub use auth::{
    AuthService, HttpUserInfoProvider, PresentedCredentials, SharedUserInfoProvider, UserInfo,
    UserInfoProvider,
};
pub use countdown::{CountdownService, CountdownView};
pub use group::{
    AddMemberOptions, BanView, GroupInput, GroupQuery, GroupService, GroupSettings, GroupView,
    MemberView,
};
pub use mail::{
    HttpMailService, MailRequest, MailService, MailTemplate, NoOpMailService, SharedMailService,
};
pub use room::{OccupantView, RoomInput, RoomQuery, RoomService, RoomSettings, RoomView};
